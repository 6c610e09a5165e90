//! Fixed-width, NUL-padded directory/file name as stored inline in a
//! metadata table entry. 16 bytes, matching the original on-disk layout;
//! names longer than that simply don't fit in this container format.

const NAME_SIZE: usize = 16;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FsName([u8; NAME_SIZE]);

impl FsName {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut bytes = [0u8; NAME_SIZE];
        let len = data.len().min(NAME_SIZE);
        bytes[..len].copy_from_slice(&data[..len]);
        FsName(bytes)
    }

    /// Builds a name from one path segment. Segments longer than the
    /// on-disk field are truncated; callers that care should reject them
    /// earlier (`FsPath::parse` does not, matching the original, which
    /// silently truncates rather than erroring on long names).
    pub fn from_segment(segment: &[u8]) -> Self {
        FsName::from_bytes(segment)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_dot(&self) -> bool {
        self.0[0] == b'.' && self.0[1] == 0
    }

    pub fn is_dotdot(&self) -> bool {
        self.0[0] == b'.' && self.0[1] == b'.' && self.0[2] == 0
    }

    pub fn to_display_string(&self) -> String {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        String::from_utf8_lossy(&self.0[..len]).into_owned()
    }
}

//! `ByteFile` is the random-access analogue of the original's
//! `FileInterface`: offset-based read/write rather than the stream-oriented
//! `Read + Seek` the upstream project used for its own (unrelated) format.
//! Every layer in the stack — AES-CTR, DPFS, IVFC, CMAC signing — is itself
//! a `ByteFile` wrapping another one, so the whole thing composes into a
//! tree of `Rc`s with no dynamic borrow-checking beyond the leaf.

use std::rc::Rc;

pub trait ByteFile {
    fn file_size(&self) -> usize;
    fn read(&self, offset: usize, size: usize) -> Vec<u8>;
    fn write(&self, offset: usize, data: &[u8]);
}

/// Every node in the byte-file tree is reference-counted and immutable from
/// the outside; the few places that need real interior mutability (the disk
/// handle, the open-file registry) use `RefCell` internally.
pub type Shared<T> = Rc<T>;
pub type ByteFileRef = Rc<dyn ByteFile>;

#[inline]
pub fn new_shared<T: 'static>(value: T) -> Shared<T> {
    Rc::new(value)
}

#[inline]
pub fn check_bounds(offset: usize, size: usize, file_size: usize) {
    assert!(
        offset.checked_add(size).map_or(false, |end| end <= file_size),
        "byte-file access out of bounds: offset={offset} size={size} file_size={file_size}"
    );
}

/// A window onto a parent `ByteFile`, translating offsets. This is how every
/// layer in the stack carves out the regions it cares about from the region
/// below it, mirroring the original's `SubFile`.
pub struct SubFile {
    parent: ByteFileRef,
    offset: usize,
    file_size: usize,
}

impl SubFile {
    pub fn new(parent: ByteFileRef, offset: usize, size: usize) -> ByteFileRef {
        assert!(
            offset.checked_add(size).map_or(false, |end| end <= parent.file_size()),
            "SubFile region out of bounds of parent"
        );
        Rc::new(SubFile { parent, offset, file_size: size })
    }
}

impl ByteFile for SubFile {
    fn file_size(&self) -> usize {
        self.file_size
    }

    fn read(&self, offset: usize, size: usize) -> Vec<u8> {
        check_bounds(offset, size, self.file_size);
        self.parent.read(self.offset + offset, size)
    }

    fn write(&self, offset: usize, data: &[u8]) {
        check_bounds(offset, data.len(), self.file_size);
        self.parent.write(self.offset + offset, data)
    }
}

#[cfg(test)]
pub(crate) struct MemByteFile {
    data: std::cell::RefCell<Vec<u8>>,
}

#[cfg(test)]
impl MemByteFile {
    pub(crate) fn new(size: usize) -> ByteFileRef {
        Rc::new(MemByteFile { data: std::cell::RefCell::new(vec![0u8; size]) })
    }

    pub(crate) fn from_bytes(data: Vec<u8>) -> ByteFileRef {
        Rc::new(MemByteFile { data: std::cell::RefCell::new(data) })
    }
}

#[cfg(test)]
impl ByteFile for MemByteFile {
    fn file_size(&self) -> usize {
        self.data.borrow().len()
    }

    fn read(&self, offset: usize, size: usize) -> Vec<u8> {
        check_bounds(offset, size, self.file_size());
        self.data.borrow()[offset..offset + size].to_vec()
    }

    fn write(&self, offset: usize, data: &[u8]) {
        check_bounds(offset, data.len(), self.file_size());
        self.data.borrow_mut()[offset..offset + data.len()].copy_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subfile_translates_offsets() {
        let parent = MemByteFile::new(32);
        parent.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let sub = SubFile::new(parent, 4, 8);
        assert_eq!(sub.read(0, 4), vec![5, 6, 7, 8]);
        sub.write(4, &[9, 9]);
        assert_eq!(sub.read(4, 2), vec![9, 9]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn subfile_rejects_out_of_bounds_read() {
        let parent = MemByteFile::new(8);
        let sub = SubFile::new(parent, 0, 4);
        sub.read(2, 4);
    }
}

//! Path resolution and whole-filesystem operations layered on top of the
//! raw `DirectoryTable`/`FileTable` hash tables. Everything here works in
//! terms of parsed path segments; callers outside this module never see a
//! raw string once `FsPath::parse` has run.

use crate::fs_name::FsName;
use crate::metadata::{DirectoryTable, FileTable};

pub const ROOT_DIRECTORY_INDEX: u32 = 1;
/// Sentinel stored in a file entry's `first_block_index` field meaning
/// "empty file, no allocation yet" — distinct from the FAT's own internal
/// `NO_INDEX`, since this is a raw on-disk field, not a biased FAT entry.
pub const EMPTY_FILE_BLOCK_INDEX: u32 = 0x8000_0000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FsResult {
    InvalidPath,
    PathNotFound,
    FileInPath,
    FileExists,
    DirExists,
    NotFound,
}

/// A path split into name segments, with `.` dropped and `..` resolved
/// against the segments already collected — a leading `..` past the root
/// is an `InvalidPath`, not silently clamped.
#[derive(Clone)]
pub struct FsPath {
    segments: Vec<FsName>,
}

impl FsPath {
    /// Builds a path directly from already-resolved segments, bypassing
    /// string parsing — what the FUSE bridge uses, since it walks inodes
    /// one name at a time rather than starting from a slash-joined string.
    pub fn from_segments(segments: Vec<FsName>) -> FsPath {
        FsPath { segments }
    }

    pub fn child(&self, name: FsName) -> FsPath {
        let mut segments = self.segments.clone();
        segments.push(name);
        FsPath { segments }
    }

    pub fn parse(path: &str) -> Result<FsPath, FsResult> {
        let mut segments: Vec<FsName> = Vec::new();
        for raw in path.split('/') {
            if raw.is_empty() || raw == "." {
                continue;
            }
            if raw == ".." {
                if segments.pop().is_none() {
                    return Err(FsResult::InvalidPath);
                }
                continue;
            }
            segments.push(FsName::from_segment(raw.as_bytes()));
        }
        Ok(FsPath { segments })
    }

    fn split_last(&self) -> Option<(&[FsName], &FsName)> {
        self.segments.split_last().map(|(last, init)| (init, last))
    }
}

/// Result of walking a path down to (but not through) its final segment:
/// the directory index it landed in plus the unresolved final name, ready
/// for a hash-table lookup in either the directory or file table.
struct Located<'a> {
    parent: u32,
    name: &'a FsName,
}

pub struct FsMetadata {
    dirs: DirectoryTable,
    files: FileTable,
}

impl FsMetadata {
    pub fn new(dirs: DirectoryTable, files: FileTable) -> Self {
        FsMetadata { dirs, files }
    }

    fn locate<'a>(&self, path: &'a FsPath) -> Result<Located<'a>, FsResult> {
        let (init, name) = match path.split_last() {
            Some(parts) => parts,
            None => return Err(FsResult::InvalidPath), // the root itself has no parent to resolve into
        };
        let mut current = ROOT_DIRECTORY_INDEX;
        for segment in init {
            let next = self.dirs.find_index(segment, current);
            if next != 0 {
                current = next;
                continue;
            }
            if self.files.find_index(segment, current) != 0 {
                return Err(FsResult::FileInPath);
            }
            return Err(FsResult::PathNotFound);
        }
        Ok(Located { parent: current, name })
    }

    pub fn find_dir(&self, path: &FsPath) -> Result<u32, FsResult> {
        if path.segments.is_empty() {
            return Ok(ROOT_DIRECTORY_INDEX);
        }
        let located = self.locate(path)?;
        let index = self.dirs.find_index(located.name, located.parent);
        if index != 0 {
            Ok(index)
        } else if self.files.find_index(located.name, located.parent) != 0 {
            Err(FsResult::FileInPath)
        } else {
            Err(FsResult::NotFound)
        }
    }

    pub fn find_file(&self, path: &FsPath) -> Result<u32, FsResult> {
        let located = self.locate(path)?;
        let index = self.files.find_index(located.name, located.parent);
        if index != 0 {
            Ok(index)
        } else if self.dirs.find_index(located.name, located.parent) != 0 {
            Err(FsResult::DirExists) // leaf is a directory, not a file
        } else {
            Err(FsResult::NotFound)
        }
    }

    pub fn make_dir(&self, path: &FsPath) -> Result<u32, FsResult> {
        let located = self.locate(path)?;
        if self.dirs.find_index(located.name, located.parent) != 0 {
            return Err(FsResult::DirExists);
        }
        if self.files.find_index(located.name, located.parent) != 0 {
            return Err(FsResult::FileExists);
        }
        let index = self.dirs.add(located.name, located.parent);
        if index == 0 {
            return Err(FsResult::PathNotFound); // table exhausted; original surfaces this as not-found too
        }
        Ok(index)
    }

    pub fn make_file(&self, path: &FsPath) -> Result<u32, FsResult> {
        let located = self.locate(path)?;
        if self.files.find_index(located.name, located.parent) != 0 {
            return Err(FsResult::FileExists);
        }
        if self.dirs.find_index(located.name, located.parent) != 0 {
            return Err(FsResult::DirExists);
        }
        let index = self.files.add(located.name, located.parent);
        if index == 0 {
            return Err(FsResult::PathNotFound);
        }
        self.files.set_block_index(index, EMPTY_FILE_BLOCK_INDEX);
        self.files.set_file_size(index, 0);
        self.link_file_into_parent(index, located.parent);
        Ok(index)
    }

    /// `FileTable` knows nothing of `DirectoryTable`'s sub_file field, so
    /// the sibling chain a directory's files hang off of is this layer's
    /// responsibility rather than the table's, unlike directories, which
    /// link themselves via `DirectoryTable::add`.
    fn link_file_into_parent(&self, index: u32, parent: u32) {
        self.files.set_next_sibling(index, self.dirs.get_sub_file(parent));
        self.dirs.set_sub_file(parent, index);
    }

    fn unlink_file_from_parent(&self, index: u32, parent: u32) {
        let mut current = self.dirs.get_sub_file(parent);
        if current == index {
            self.dirs.set_sub_file(parent, self.files.get_next_sibling(index));
            return;
        }
        loop {
            assert_ne!(current, 0, "file sibling chain broken");
            let next = self.files.get_next_sibling(current);
            if next == index {
                self.files.set_next_sibling(current, self.files.get_next_sibling(index));
                return;
            }
            current = next;
        }
    }

    pub fn remove_dir(&self, path: &FsPath) -> Result<(), FsResult> {
        let index = self.find_dir(path)?;
        if index == ROOT_DIRECTORY_INDEX {
            return Err(FsResult::InvalidPath);
        }
        if self.dirs.remove(index) {
            Ok(())
        } else {
            Err(FsResult::DirExists) // not empty
        }
    }

    pub fn remove_file(&self, path: &FsPath) -> Result<u32, FsResult> {
        let index = self.find_file(path)?;
        let parent = self.files.get_parent(index);
        self.unlink_file_from_parent(index, parent);
        self.files.remove(index);
        Ok(index)
    }

    pub fn move_dir(&self, src: &FsPath, dst: &FsPath) -> Result<(), FsResult> {
        let index = self.find_dir(src)?;
        if index == ROOT_DIRECTORY_INDEX {
            return Err(FsResult::InvalidPath);
        }
        let located = self.locate(dst)?;
        if self.dirs.find_index(located.name, located.parent) != 0 {
            return Err(FsResult::DirExists);
        }
        if self.files.find_index(located.name, located.parent) != 0 {
            return Err(FsResult::FileExists);
        }
        self.dirs.move_entry(index, located.name, located.parent);
        Ok(())
    }

    pub fn move_file(&self, src: &FsPath, dst: &FsPath) -> Result<(), FsResult> {
        let index = self.find_file(src)?;
        let old_parent = self.files.get_parent(index);
        let located = self.locate(dst)?;
        if self.files.find_index(located.name, located.parent) != 0 {
            return Err(FsResult::FileExists);
        }
        if self.dirs.find_index(located.name, located.parent) != 0 {
            return Err(FsResult::DirExists);
        }
        self.unlink_file_from_parent(index, old_parent);
        self.files.move_entry(index, located.name, located.parent);
        self.link_file_into_parent(index, located.parent);
        Ok(())
    }

    pub fn list_sub_dir(&self, path: &FsPath) -> Result<Vec<FsName>, FsResult> {
        let index = self.find_dir(path)?;
        Ok(self.dirs.list_sub_dirs(index))
    }

    pub fn list_sub_file(&self, path: &FsPath) -> Result<Vec<FsName>, FsResult> {
        let index = self.find_dir(path)?;
        Ok(self.files.list_siblings(self.dirs.get_sub_file(index)))
    }

    pub fn get_file_size(&self, index: u32) -> u64 {
        self.files.get_file_size(index)
    }

    pub fn set_file_size(&self, index: u32, size: u64) {
        self.files.set_file_size(index, size);
    }

    pub fn get_file_block_index(&self, index: u32) -> u32 {
        self.files.get_block_index(index)
    }

    pub fn set_file_block_index(&self, index: u32, block_index: u32) {
        self.files.set_block_index(index, block_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_file::MemByteFile;

    fn new_fs(max_dirs: u32, max_files: u32) -> FsMetadata {
        let dir_entries = MemByteFile::new(0x28 * (max_dirs as usize + 2));
        let dir_hash = MemByteFile::new(16);
        dir_entries.write(4, &(max_dirs + 2).to_le_bytes());
        dir_entries.write(0, &2u32.to_le_bytes());
        let dirs = DirectoryTable::new(dir_entries, dir_hash);

        let file_entries = MemByteFile::new(0x30 * (max_files as usize + 1));
        let file_hash = MemByteFile::new(16);
        file_entries.write(4, &(max_files + 1).to_le_bytes());
        file_entries.write(0, &1u32.to_le_bytes());
        let files = FileTable::new(file_entries, file_hash);

        FsMetadata::new(dirs, files)
    }

    #[test]
    fn make_dir_then_find_it() {
        let fs = new_fs(4, 4);
        let path = FsPath::parse("/docs").unwrap();
        let index = fs.make_dir(&path).unwrap();
        assert_eq!(fs.find_dir(&path).unwrap(), index);
    }

    #[test]
    fn nested_make_dir_and_file() {
        let fs = new_fs(4, 4);
        fs.make_dir(&FsPath::parse("/docs").unwrap()).unwrap();
        let file_path = FsPath::parse("/docs/readme.txt").unwrap();
        let file_index = fs.make_file(&file_path).unwrap();
        assert_eq!(fs.find_file(&file_path).unwrap(), file_index);
        assert_eq!(fs.get_file_block_index(file_index), EMPTY_FILE_BLOCK_INDEX);
    }

    #[test]
    fn make_file_through_missing_directory_is_path_not_found() {
        let fs = new_fs(4, 4);
        let result = fs.make_file(&FsPath::parse("/missing/readme.txt").unwrap());
        assert_eq!(result, Err(FsResult::PathNotFound));
    }

    #[test]
    fn make_file_through_a_file_is_file_in_path() {
        let fs = new_fs(4, 4);
        fs.make_file(&FsPath::parse("/blob").unwrap()).unwrap();
        let result = fs.make_file(&FsPath::parse("/blob/readme.txt").unwrap());
        assert_eq!(result, Err(FsResult::FileInPath));
    }

    #[test]
    fn remove_non_empty_directory_fails() {
        let fs = new_fs(4, 4);
        fs.make_dir(&FsPath::parse("/docs").unwrap()).unwrap();
        fs.make_file(&FsPath::parse("/docs/readme.txt").unwrap()).unwrap();
        assert_eq!(fs.remove_dir(&FsPath::parse("/docs").unwrap()), Err(FsResult::DirExists));
    }

    #[test]
    fn find_file_on_a_directory_path_reports_dir_exists() {
        let fs = new_fs(4, 4);
        fs.make_dir(&FsPath::parse("/docs").unwrap()).unwrap();
        assert_eq!(fs.find_file(&FsPath::parse("/docs").unwrap()), Err(FsResult::DirExists));
    }

    #[test]
    fn remove_root_is_rejected() {
        let fs = new_fs(4, 4);
        assert_eq!(fs.remove_dir(&FsPath::parse("/").unwrap()), Err(FsResult::InvalidPath));
    }

    #[test]
    fn move_file_between_directories() {
        let fs = new_fs(4, 4);
        fs.make_dir(&FsPath::parse("/a").unwrap()).unwrap();
        fs.make_dir(&FsPath::parse("/b").unwrap()).unwrap();
        fs.make_file(&FsPath::parse("/a/x.txt").unwrap()).unwrap();
        fs.move_file(&FsPath::parse("/a/x.txt").unwrap(), &FsPath::parse("/b/y.txt").unwrap()).unwrap();
        assert_eq!(fs.find_file(&FsPath::parse("/a/x.txt").unwrap()), Err(FsResult::NotFound));
        assert!(fs.find_file(&FsPath::parse("/b/y.txt").unwrap()).is_ok());
    }

    #[test]
    fn dotdot_past_root_is_invalid() {
        assert_eq!(FsPath::parse("/../x").err(), Some(FsResult::InvalidPath));
    }

    #[test]
    fn list_sub_dir_and_file() {
        let fs = new_fs(4, 4);
        fs.make_dir(&FsPath::parse("/docs").unwrap()).unwrap();
        fs.make_file(&FsPath::parse("/readme.txt").unwrap()).unwrap();
        let root = FsPath::parse("/").unwrap();
        assert_eq!(fs.list_sub_dir(&root).unwrap(), vec![FsName::from_segment(b"docs")]);
        assert_eq!(fs.list_sub_file(&root).unwrap(), vec![FsName::from_segment(b"readme.txt")]);
    }
}

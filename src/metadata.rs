//! Hash-bucketed directory/file tables. Both tables share the same slot
//! layout and hashing/free-list machinery — only the entry size and the
//! extra fields (a directory's sub_dir/sub_file heads) differ — so the
//! common bits live in `MetadataTableBase` and `DirectoryTable`/`FileTable`
//! are thin, type-specific wrappers around it. C++'s non-type template
//! parameter (`MetadataTable<EntrySize>`) becomes a runtime field here:
//! Rust const generics would work too, but the entry size never needs to be
//! known at compile time anywhere in this crate.

use crate::byte_file::ByteFileRef;
use crate::fs_name::FsName;

const PARENT_OFFSET: usize = 0x00;
const NAME_OFFSET: usize = 0x04;
const NEXT_SIBLING_OFFSET: usize = 0x14;
const HASH_SALT: u32 = 0x091A_2B3C;

/// Slot 0 of every table is a sentinel holding table-wide bookkeeping
/// instead of an entry: current/max live-entry counts and the free-slot
/// list head, the latter threaded through the same field used for live
/// hash-bucket collision chaining.
struct Sentinel;
impl Sentinel {
    const CURRENT_COUNT_OFFSET: usize = 0x00;
    const MAX_COUNT_OFFSET: usize = 0x04;
}

pub struct MetadataTableBase {
    entry_table: ByteFileRef,
    hash_table: ByteFileRef,
    entry_size: usize,
    hash_bucket_count: u32,
}

impl MetadataTableBase {
    pub fn new(entry_table: ByteFileRef, hash_table: ByteFileRef, entry_size: usize) -> Self {
        let hash_bucket_count = (hash_table.file_size() / 4) as u32;
        MetadataTableBase { entry_table, hash_table, entry_size, hash_bucket_count }
    }

    fn entry_offset(&self, index: u32, field: usize) -> usize {
        self.entry_size * index as usize + field
    }

    fn get_u32(&self, index: u32, field: usize) -> u32 {
        crate::util::decode_u32(&self.entry_table.read(self.entry_offset(index, field), 4))
    }

    fn set_u32(&self, index: u32, field: usize, value: u32) {
        self.entry_table.write(self.entry_offset(index, field), &value.to_le_bytes());
    }

    fn get_u64(&self, index: u32, field: usize) -> u64 {
        crate::util::decode_u64(&self.entry_table.read(self.entry_offset(index, field), 8))
    }

    fn set_u64(&self, index: u32, field: usize, value: u64) {
        self.entry_table.write(self.entry_offset(index, field), &value.to_le_bytes());
    }

    pub fn get_u32_field(&self, index: u32, field: usize) -> u32 {
        self.get_u32(index, field)
    }

    pub fn set_u32_field(&self, index: u32, field: usize, value: u32) {
        self.set_u32(index, field, value)
    }

    pub fn get_u64_field(&self, index: u32, field: usize) -> u64 {
        self.get_u64(index, field)
    }

    pub fn set_u64_field(&self, index: u32, field: usize, value: u64) {
        self.set_u64(index, field, value)
    }

    fn get_name(&self, index: u32) -> FsName {
        FsName::from_bytes(&self.entry_table.read(self.entry_offset(index, NAME_OFFSET), 16))
    }

    fn set_name(&self, index: u32, name: &FsName) {
        self.entry_table.write(self.entry_offset(index, NAME_OFFSET), name.as_bytes());
    }

    pub fn get_parent(&self, index: u32) -> u32 {
        self.get_u32(index, PARENT_OFFSET)
    }

    fn set_parent(&self, index: u32, parent: u32) {
        self.set_u32(index, PARENT_OFFSET, parent);
    }

    pub fn get_next_sibling(&self, index: u32) -> u32 {
        self.get_u32(index, NEXT_SIBLING_OFFSET)
    }

    pub fn set_next_sibling(&self, index: u32, next: u32) {
        self.set_u32(index, NEXT_SIBLING_OFFSET, next);
    }

    fn get_collision(&self, index: u32) -> u32 {
        self.get_u32(index, self.entry_size - 4)
    }

    fn set_collision(&self, index: u32, value: u32) {
        self.set_u32(index, self.entry_size - 4, value);
    }

    fn get_current_count(&self) -> u32 {
        self.get_u32(0, Sentinel::CURRENT_COUNT_OFFSET)
    }

    fn set_current_count(&self, value: u32) {
        self.set_u32(0, Sentinel::CURRENT_COUNT_OFFSET, value);
    }

    fn get_max_count(&self) -> u32 {
        self.get_u32(0, Sentinel::MAX_COUNT_OFFSET)
    }

    /// The free-slot list is threaded through the same field live entries
    /// use for hash-bucket collision chaining; slot 0's copy of that field
    /// is the list head.
    fn get_next_free(&self, index: u32) -> u32 {
        self.get_collision(index)
    }

    fn set_next_free(&self, index: u32, value: u32) {
        self.set_collision(index, value);
    }

    fn hash(&self, name: &FsName, parent: u32) -> u32 {
        let mut hash = parent ^ HASH_SALT;
        let bytes = name.as_bytes();
        for chunk in bytes.chunks_exact(4) {
            hash = hash.rotate_right(1);
            hash ^= u32::from_le_bytes(chunk.try_into().unwrap());
        }
        hash % self.hash_bucket_count
    }

    fn get_bucket(&self, bucket: u32) -> u32 {
        crate::util::decode_u32(&self.hash_table.read(bucket as usize * 4, 4))
    }

    fn set_bucket(&self, bucket: u32, value: u32) {
        self.hash_table.write(bucket as usize * 4, &value.to_le_bytes());
    }

    pub fn find_index(&self, name: &FsName, parent: u32) -> u32 {
        assert_ne!(parent, 0, "entry 0 is the table sentinel, never a valid parent");
        let bucket = self.hash(name, parent);
        let mut current = self.get_bucket(bucket);
        while current != 0 {
            if self.get_parent(current) == parent && &self.get_name(current) == name {
                return current;
            }
            current = self.get_collision(current);
        }
        0
    }

    fn allocate_slot(&self) -> u32 {
        let free_head = self.get_next_free(0);
        if free_head != 0 {
            let next = self.get_next_free(free_head);
            self.set_next_free(0, next);
            return free_head;
        }
        let current = self.get_current_count();
        if current == self.get_max_count() {
            return 0;
        }
        self.set_current_count(current + 1);
        current
    }

    fn free_slot(&self, index: u32) {
        let head = self.get_next_free(0);
        self.set_next_free(index, head);
        self.set_next_free(0, index);
    }

    fn add_to_hash_table(&self, index: u32) {
        let parent = self.get_parent(index);
        let name = self.get_name(index);
        let bucket = self.hash(&name, parent);
        self.set_collision(index, self.get_bucket(bucket));
        self.set_bucket(bucket, index);
    }

    fn remove_from_hash_table(&self, index: u32) {
        let parent = self.get_parent(index);
        let name = self.get_name(index);
        let bucket = self.hash(&name, parent);
        let mut current = self.get_bucket(bucket);
        if current == index {
            self.set_bucket(bucket, self.get_collision(index));
            return;
        }
        loop {
            assert_ne!(current, 0, "hash bucket chain broken: entry not found among its own bucket");
            let next = self.get_collision(current);
            if next == index {
                self.set_collision(current, self.get_collision(index));
                return;
            }
            current = next;
        }
    }

    pub fn add(&self, name: &FsName, parent: u32) -> u32 {
        assert_ne!(parent, 0);
        let index = self.allocate_slot();
        if index == 0 {
            return 0;
        }
        self.set_parent(index, parent);
        self.set_name(index, name);
        self.set_next_sibling(index, 0);
        self.add_to_hash_table(index);
        index
    }

    pub fn remove(&self, index: u32) {
        assert_ne!(index, 0);
        self.remove_from_hash_table(index);
        self.free_slot(index);
    }

    pub fn move_entry(&self, index: u32, name: &FsName, parent: u32) {
        assert_ne!(index, 0);
        self.remove_from_hash_table(index);
        self.set_name(index, name);
        self.set_parent(index, parent);
        self.add_to_hash_table(index);
    }

    pub fn list_siblings(&self, mut head: u32) -> Vec<FsName> {
        let mut result = Vec::new();
        while head != 0 {
            result.push(self.get_name(head));
            head = self.get_next_sibling(head);
        }
        result
    }
}

const DIR_ENTRY_SIZE: usize = 0x28;
const DIR_SUB_DIR_OFFSET: usize = 0x18;
const DIR_SUB_FILE_OFFSET: usize = 0x1C;

pub struct DirectoryTable {
    base: MetadataTableBase,
}

impl DirectoryTable {
    pub fn new(entry_table: ByteFileRef, hash_table: ByteFileRef) -> Self {
        DirectoryTable { base: MetadataTableBase::new(entry_table, hash_table, DIR_ENTRY_SIZE) }
    }

    pub fn find_index(&self, name: &FsName, parent: u32) -> u32 {
        self.base.find_index(name, parent)
    }

    pub fn get_parent(&self, index: u32) -> u32 {
        self.base.get_parent(index)
    }

    pub fn get_sub_dir(&self, index: u32) -> u32 {
        self.base.get_u32_field(index, DIR_SUB_DIR_OFFSET)
    }

    fn set_sub_dir(&self, index: u32, value: u32) {
        self.base.set_u32_field(index, DIR_SUB_DIR_OFFSET, value);
    }

    pub fn get_sub_file(&self, index: u32) -> u32 {
        self.base.get_u32_field(index, DIR_SUB_FILE_OFFSET)
    }

    pub fn set_sub_file(&self, index: u32, value: u32) {
        self.base.set_u32_field(index, DIR_SUB_FILE_OFFSET, value);
    }

    fn link_into_parent(&self, index: u32, parent: u32) {
        self.base.set_next_sibling(index, self.get_sub_dir(parent));
        self.set_sub_dir(parent, index);
    }

    fn unlink_from_parent(&self, index: u32) {
        let parent = self.base.get_parent(index);
        let mut current = self.get_sub_dir(parent);
        if current == index {
            self.set_sub_dir(parent, self.base.get_next_sibling(index));
            return;
        }
        loop {
            assert_ne!(current, 0, "directory sibling chain broken");
            let next = self.base.get_next_sibling(current);
            if next == index {
                self.base.set_next_sibling(current, self.base.get_next_sibling(index));
                return;
            }
            current = next;
        }
    }

    pub fn add(&self, name: &FsName, parent: u32) -> u32 {
        let index = self.base.add(name, parent);
        if index == 0 {
            return 0;
        }
        self.set_sub_dir(index, 0);
        self.set_sub_file(index, 0);
        self.link_into_parent(index, parent);
        index
    }

    /// Returns `false` (without modifying anything) if the directory still
    /// has children; a non-empty directory cannot be removed.
    pub fn remove(&self, index: u32) -> bool {
        if self.get_sub_dir(index) != 0 || self.get_sub_file(index) != 0 {
            return false;
        }
        self.unlink_from_parent(index);
        self.base.remove(index);
        true
    }

    pub fn move_entry(&self, index: u32, name: &FsName, parent: u32) {
        self.unlink_from_parent(index);
        self.base.move_entry(index, name, parent);
        self.link_into_parent(index, parent);
    }

    pub fn list_sub_dirs(&self, index: u32) -> Vec<FsName> {
        self.base.list_siblings(self.get_sub_dir(index))
    }
}

const FILE_ENTRY_SIZE: usize = 0x30;
const FILE_BLOCK_INDEX_OFFSET: usize = 0x1C;
const FILE_SIZE_OFFSET: usize = 0x20;

pub struct FileTable {
    base: MetadataTableBase,
}

impl FileTable {
    pub fn new(entry_table: ByteFileRef, hash_table: ByteFileRef) -> Self {
        FileTable { base: MetadataTableBase::new(entry_table, hash_table, FILE_ENTRY_SIZE) }
    }

    pub fn find_index(&self, name: &FsName, parent: u32) -> u32 {
        self.base.find_index(name, parent)
    }

    pub fn get_parent(&self, index: u32) -> u32 {
        self.base.get_parent(index)
    }

    pub fn get_next_sibling(&self, index: u32) -> u32 {
        self.base.get_next_sibling(index)
    }

    pub fn set_next_sibling(&self, index: u32, value: u32) {
        self.base.set_next_sibling(index, value);
    }

    pub fn add(&self, name: &FsName, parent: u32) -> u32 {
        self.base.add(name, parent)
    }

    pub fn remove(&self, index: u32) {
        self.base.remove(index);
    }

    pub fn move_entry(&self, index: u32, name: &FsName, parent: u32) {
        self.base.move_entry(index, name, parent);
    }

    pub fn list_siblings(&self, head: u32) -> Vec<FsName> {
        self.base.list_siblings(head)
    }

    pub fn get_block_index(&self, index: u32) -> u32 {
        self.base.get_u32_field(index, FILE_BLOCK_INDEX_OFFSET)
    }

    pub fn set_block_index(&self, index: u32, value: u32) {
        self.base.set_u32_field(index, FILE_BLOCK_INDEX_OFFSET, value);
    }

    pub fn get_file_size(&self, index: u32) -> u64 {
        self.base.get_u64_field(index, FILE_SIZE_OFFSET)
    }

    pub fn set_file_size(&self, index: u32, value: u64) {
        self.base.set_u64_field(index, FILE_SIZE_OFFSET, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_file::MemByteFile;

    fn new_dir_table(max_dirs: u32, bucket_count: u32) -> DirectoryTable {
        let entries = MemByteFile::new(DIR_ENTRY_SIZE * (max_dirs as usize + 2));
        let hash = MemByteFile::new(bucket_count as usize * 4);
        // slot 0: sentinel; slot 1: preexisting root directory.
        entries.write(Sentinel::MAX_COUNT_OFFSET, &(max_dirs + 2).to_le_bytes());
        entries.write(Sentinel::CURRENT_COUNT_OFFSET, &2u32.to_le_bytes());
        DirectoryTable::new(entries, hash)
    }

    fn new_file_table(max_files: u32, bucket_count: u32) -> FileTable {
        let entries = MemByteFile::new(FILE_ENTRY_SIZE * (max_files as usize + 1));
        let hash = MemByteFile::new(bucket_count as usize * 4);
        entries.write(Sentinel::MAX_COUNT_OFFSET, &(max_files + 1).to_le_bytes());
        entries.write(Sentinel::CURRENT_COUNT_OFFSET, &1u32.to_le_bytes());
        FileTable::new(entries, hash)
    }

    #[test]
    fn add_then_find_round_trips() {
        let table = new_dir_table(4, 4);
        let name = FsName::from_segment(b"docs");
        let index = table.add(&name, 1);
        assert_ne!(index, 0);
        assert_eq!(table.find_index(&name, 1), index);
        assert_eq!(table.find_index(&name, 2), 0, "same name under a different parent must not match");
    }

    #[test]
    fn remove_requires_empty_directory() {
        let table = new_dir_table(4, 4);
        let parent = table.add(&FsName::from_segment(b"a"), 1);
        table.set_sub_file(parent, 7); // pretend it has a file child
        assert!(!table.remove(parent));
        table.set_sub_file(parent, 0);
        assert!(table.remove(parent));
        assert_eq!(table.find_index(&FsName::from_segment(b"a"), 1), 0);
    }

    #[test]
    fn freed_slot_is_reused() {
        let table = new_dir_table(1, 4);
        let a = table.add(&FsName::from_segment(b"a"), 1);
        assert!(table.remove(a));
        let b = table.add(&FsName::from_segment(b"b"), 1);
        assert_eq!(a, b, "the single free slot must be recycled");
    }

    #[test]
    fn move_updates_parent_and_hash_bucket() {
        let table = new_dir_table(4, 4);
        let src = table.add(&FsName::from_segment(b"src"), 1);
        let dst_parent = table.add(&FsName::from_segment(b"dst"), 1);
        table.move_entry(src, &FsName::from_segment(b"moved"), dst_parent);
        assert_eq!(table.find_index(&FsName::from_segment(b"src"), 1), 0);
        assert_eq!(table.find_index(&FsName::from_segment(b"moved"), dst_parent), src);
        assert_eq!(table.list_sub_dirs(1), vec![FsName::from_segment(b"dst")]);
        assert_eq!(table.list_sub_dirs(dst_parent), vec![FsName::from_segment(b"moved")]);
    }

    #[test]
    fn file_table_tracks_size_and_block_index() {
        let table = new_file_table(2, 4);
        let f = table.add(&FsName::from_segment(b"x"), 1);
        table.set_file_size(f, 0x1234);
        table.set_block_index(f, 7);
        assert_eq!(table.get_file_size(f), 0x1234);
        assert_eq!(table.get_block_index(f), 7);
    }
}

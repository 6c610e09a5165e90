//! Integrity Verification File Container: a single level of a SHA-256 hash
//! tree. Each block of the body has a corresponding 32-byte hash stored in
//! the `hash` byte file (itself usually another `IvfcLevel`, one level up).
//! A mismatch on read never panics — the original treats a torn/corrupted
//! block as recoverable by the caller, so a bad block reads back as a fixed
//! poison pattern instead of aborting the whole mount.

use std::rc::Rc;

use crate::block_file::{block_file_read, block_file_write, BlockSource};
use crate::byte_file::{check_bounds, ByteFile, ByteFileRef};
use crate::crypto::sha256;

const HASH_SIZE: usize = 0x20;
const POISON_BYTE: u8 = 0xDD;

pub struct IvfcLevel {
    hash: ByteFileRef,
    body: ByteFileRef,
    block_size: usize,
    file_size: usize,
}

impl IvfcLevel {
    pub fn new(hash: ByteFileRef, body: ByteFileRef, block_size: usize) -> ByteFileRef {
        let file_size = body.file_size();
        Rc::new(IvfcLevel { hash, body, block_size, file_size })
    }
}

impl BlockSource for IvfcLevel {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn body_size(&self) -> usize {
        self.file_size
    }

    fn read_block(&self, index: usize) -> Vec<u8> {
        let offset = index * self.block_size;
        let end = (offset + self.block_size).min(self.file_size);
        let mut buf = self.body.read(offset, end - offset);
        buf.resize(self.block_size, 0);

        let expected = self.hash.read(index * HASH_SIZE, HASH_SIZE);
        if expected != sha256(&buf) {
            log::warn!("IVFC integrity check failed at block {index}; returning poison block");
            return vec![POISON_BYTE; self.block_size];
        }
        buf
    }

    fn write_block(&self, index: usize, data: &[u8]) {
        self.hash.write(index * HASH_SIZE, &sha256(data));
        let offset = index * self.block_size;
        let end = (offset + self.block_size).min(self.file_size);
        self.body.write(offset, &data[..end - offset]);
    }
}

impl ByteFile for IvfcLevel {
    fn file_size(&self) -> usize {
        self.file_size
    }

    fn read(&self, offset: usize, size: usize) -> Vec<u8> {
        check_bounds(offset, size, self.file_size);
        block_file_read(self, offset, size)
    }

    fn write(&self, offset: usize, data: &[u8]) {
        check_bounds(offset, data.len(), self.file_size);
        block_file_write(self, offset, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_file::MemByteFile;

    #[test]
    fn write_then_read_round_trips() {
        let hash = MemByteFile::new(HASH_SIZE * 2);
        let body = MemByteFile::new(32);
        let level = IvfcLevel::new(hash, body, 16);
        level.write(0, &[7u8; 32]);
        assert_eq!(level.read(0, 32), vec![7u8; 32]);
    }

    #[test]
    fn corrupted_block_reads_back_as_poison() {
        let hash = MemByteFile::new(HASH_SIZE);
        let body = MemByteFile::new(16);
        let level = IvfcLevel::new(hash, body.clone(), 16);
        level.write(0, &[1u8; 16]);

        // Simulate on-disk bit rot by mutating the body directly, bypassing
        // the hash update the IVFC layer would normally perform.
        body.write(0, &[2u8; 16]);

        assert_eq!(level.read(0, 16), vec![POISON_BYTE; 16]);
    }

    #[test]
    fn untouched_hash_still_matches_zeroed_block() {
        let hash = MemByteFile::new(HASH_SIZE);
        let body = MemByteFile::new(16);
        hash.write(0, &sha256(&[0u8; 16]));
        let level = IvfcLevel::new(hash, body, 16);
        assert_eq!(level.read(0, 16), vec![0u8; 16]);
    }
}

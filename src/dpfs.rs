//! Duplex File Store: an A/B mirrored region selected per block by a bitmap
//! living in a separate, smaller byte file. Only the selected copy is ever
//! touched by a write; the selector itself is read-only from this layer's
//! point of view (whichever layer owns it decides when to flip bits).

use std::rc::Rc;

use crate::block_file::{block_file_read, block_file_write, BlockSource};
use crate::byte_file::{check_bounds, ByteFile, ByteFileRef};
use crate::util::decode_u32;

pub struct DpfsLevel {
    selector: ByteFileRef,
    pair: ByteFileRef,
    block_size: usize,
    file_size: usize,
}

impl DpfsLevel {
    pub fn new(selector: ByteFileRef, pair: ByteFileRef, block_size: usize) -> ByteFileRef {
        assert_eq!(pair.file_size() % 2, 0, "DPFS pair region must hold two equal-size copies");
        let file_size = pair.file_size() / 2;
        Rc::new(DpfsLevel { selector, pair, block_size, file_size })
    }

    /// Returns the byte offset of the active copy for the block at `index`:
    /// either `0` or `file_size`, selected by bit `31 - index % 32` of the
    /// big-endian 32-bit group `index / 32` in the selector bitmap.
    fn active_copy_offset(&self, index: usize) -> usize {
        let word_index = index / 32;
        let bit_index = index % 32;
        let group = decode_u32(&self.selector.read(word_index * 4, 4));
        let bit = (group >> (31 - bit_index)) & 1;
        bit as usize * self.file_size
    }
}

impl BlockSource for DpfsLevel {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn body_size(&self) -> usize {
        self.file_size
    }

    fn read_block(&self, index: usize) -> Vec<u8> {
        let offset = index * self.block_size;
        let end = (offset + self.block_size).min(self.file_size);
        let mut buf = self.pair.read(offset + self.active_copy_offset(index), end - offset);
        buf.resize(self.block_size, 0);
        buf
    }

    fn write_block(&self, index: usize, data: &[u8]) {
        let offset = index * self.block_size;
        let end = (offset + self.block_size).min(self.file_size);
        self.pair.write(offset + self.active_copy_offset(index), &data[..end - offset]);
    }
}

impl ByteFile for DpfsLevel {
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
    fn selector_zero_picks_first_copy() {
        let selector = MemByteFile::new(4); // all-zero group -> bit 0 everywhere
        let pair = MemByteFile::new(32); // two 16-byte copies
        let dpfs = DpfsLevel::new(selector, pair.clone(), 16);
        dpfs.write(0, &[0xAAu8; 16]);
        assert_eq!(pair.read(0, 16), vec![0xAAu8; 16]);
        assert_eq!(pair.read(16, 16), vec![0u8; 16]);
    }

    #[test]
    fn selector_one_picks_second_copy() {
        let selector = MemByteFile::new(4);
        selector.write(0, &0x8000_0000u32.to_le_bytes()); // bit 31 of group 0 -> block 0 selects copy 1
        let pair = MemByteFile::new(32);
        let dpfs = DpfsLevel::new(selector, pair.clone(), 16);
        dpfs.write(0, &[0xBBu8; 16]);
        assert_eq!(pair.read(0, 16), vec![0u8; 16]);
        assert_eq!(pair.read(16, 16), vec![0xBBu8; 16]);
    }

    #[test]
    fn per_block_selection_is_independent() {
        let selector = MemByteFile::new(4);
        // bit 31 (block 0) -> copy 1, bit 30 (block 1) -> copy 0
        selector.write(0, &0x8000_0000u32.to_le_bytes());
        let pair = MemByteFile::new(64); // two 32-byte copies, 2 blocks of 16
        let dpfs = DpfsLevel::new(selector, pair, 16);
        dpfs.write(0, &[1u8; 16]);
        dpfs.write(16, &[2u8; 16]);
        assert_eq!(dpfs.read(0, 16), vec![1u8; 16]);
        assert_eq!(dpfs.read(16, 16), vec![2u8; 16]);
    }
}

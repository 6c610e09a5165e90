//! Block-aligned read/write driver shared by every fixed-block-size layer
//! (AES-CTR, DPFS, IVFC). Rust has no base-class data members to hang this
//! logic off, so it is a trait plus two free functions instead of the
//! original's `BlockFile` base class: any `BlockSource` gets `ByteFile`
//! read/write semantics by delegating to `block_file_read`/`block_file_write`.

use crate::util::{align_down, align_up};

pub trait BlockSource {
    fn block_size(&self) -> usize;
    /// Logical size of the content the blocks cover; the final block may be
    /// partially valid when the body size isn't block-aligned.
    fn body_size(&self) -> usize;
    fn read_block(&self, index: usize) -> Vec<u8>;
    fn write_block(&self, index: usize, data: &[u8]);
}

pub fn block_file_read<B: BlockSource + ?Sized>(src: &B, offset: usize, size: usize) -> Vec<u8> {
    if size == 0 {
        return Vec::new();
    }
    let block_size = src.block_size();
    let lower = align_down(offset, block_size);
    let upper = align_up(offset + size, block_size);

    let mut buffer = Vec::with_capacity(upper - lower);
    let mut pos = lower;
    while pos < upper {
        buffer.extend(src.read_block(pos / block_size));
        pos += block_size;
    }

    buffer.drain(0..(offset - lower));
    buffer.truncate(size);
    buffer
}

pub fn block_file_write<B: BlockSource + ?Sized>(src: &B, offset: usize, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    let block_size = src.block_size();
    let end = offset + data.len();
    let lower = align_down(offset, block_size);
    let upper = align_up(end, block_size);

    let mut buffer = Vec::with_capacity(upper - lower);
    if lower != offset {
        let mut head = src.read_block(lower / block_size);
        head.truncate(offset - lower);
        buffer.extend(head);
    }
    buffer.extend_from_slice(data);
    if upper != end {
        let last_block = src.read_block(upper / block_size - 1);
        buffer.extend_from_slice(&last_block[block_size - (upper - end)..]);
    }

    let mut pos = lower;
    while pos < upper {
        let rel = pos - lower;
        src.write_block(pos / block_size, &buffer[rel..rel + block_size]);
        pos += block_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeBlocks {
        block_size: usize,
        body_size: usize,
        blocks: RefCell<Vec<Vec<u8>>>,
    }

    impl BlockSource for FakeBlocks {
        fn block_size(&self) -> usize {
            self.block_size
        }
        fn body_size(&self) -> usize {
            self.body_size
        }
        fn read_block(&self, index: usize) -> Vec<u8> {
            self.blocks.borrow()[index].clone()
        }
        fn write_block(&self, index: usize, data: &[u8]) {
            self.blocks.borrow_mut()[index] = data.to_vec();
        }
    }

    fn fake(block_size: usize, block_count: usize) -> FakeBlocks {
        FakeBlocks {
            block_size,
            body_size: block_size * block_count,
            blocks: RefCell::new(vec![vec![0u8; block_size]; block_count]),
        }
    }

    #[test]
    fn unaligned_write_preserves_neighbor_bytes() {
        let src = fake(16, 4);
        block_file_write(&src, 0, &[0xAAu8; 16]);
        block_file_write(&src, 10, &[0xBBu8; 8]);
        let result = block_file_read(&src, 0, 32);
        assert_eq!(&result[0..10], &[0xAAu8; 10]);
        assert_eq!(&result[10..18], &[0xBBu8; 8]);
        assert_eq!(&result[18..32], &[0u8; 14]);
    }

    #[test]
    fn read_spanning_multiple_blocks() {
        let src = fake(8, 4);
        block_file_write(&src, 0, &(0u8..32).collect::<Vec<_>>());
        assert_eq!(block_file_read(&src, 5, 20), (5u8..25).collect::<Vec<_>>());
    }
}

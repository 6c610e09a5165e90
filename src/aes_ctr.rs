//! AES-CTR byte file with the reference implementation's counter-advance
//! rule: the IV is treated as a 16-byte big-endian value, and only the low
//! 8 bytes (indices 15 down to 8) are incremented by the block index, with
//! carries propagating upward through that same 8-byte window — the high
//! 8 bytes of the IV are never touched. This is *not* a textbook 128-bit
//! CTR counter, so it's implemented by hand against AES-128-ECB rather than
//! through a streaming `ctr::Ctr128` cipher, which assumes the full 128 bits
//! participate in the count.

use std::rc::Rc;

use crate::block_file::{block_file_read, block_file_write, BlockSource};
use crate::byte_file::{check_bounds, ByteFile, ByteFileRef};
use crate::crypto::aes128_ecb_encrypt_block;

const BLOCK_SIZE: usize = 16;

pub struct AesCtrFile {
    cipher: ByteFileRef,
    key: [u8; 16],
    iv: [u8; 16],
    file_size: usize,
}

impl AesCtrFile {
    pub fn new(cipher: ByteFileRef, key: [u8; 16], iv: [u8; 16]) -> ByteFileRef {
        let file_size = cipher.file_size();
        Rc::new(AesCtrFile { cipher, key, iv, file_size })
    }

    #[cfg(test)]
    fn counter_bytes(&self, block_index: usize) -> [u8; 16] {
        let mut counter = self.iv;
        let mut carry = block_index as u64;
        for i in (8..16).rev() {
            carry += counter[i] as u64;
            counter[i] = (carry & 0xFF) as u8;
            carry >>= 8;
        }
        counter
    }

    fn seek_iv(&self, block_index: usize) -> [u8; 16] {
        let mut counter = self.iv;
        let mut carry = block_index as u64;
        for i in (8..16).rev() {
            carry += counter[i] as u64;
            counter[i] = (carry & 0xFF) as u8;
            carry >>= 8;
        }
        aes128_ecb_encrypt_block(&self.key, &counter)
    }
}

impl BlockSource for AesCtrFile {
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn body_size(&self) -> usize {
        self.file_size
    }

    fn read_block(&self, index: usize) -> Vec<u8> {
        let offset = index * BLOCK_SIZE;
        let end = (offset + BLOCK_SIZE).min(self.file_size);
        let mut buf = self.cipher.read(offset, end - offset);
        buf.resize(BLOCK_SIZE, 0);
        let pad = self.seek_iv(index);
        for i in 0..BLOCK_SIZE {
            buf[i] ^= pad[i];
        }
        buf
    }

    fn write_block(&self, index: usize, data: &[u8]) {
        let offset = index * BLOCK_SIZE;
        let end = (offset + BLOCK_SIZE).min(self.file_size);
        let pad = self.seek_iv(index);
        let mut buf = data[..end - offset].to_vec();
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= pad[i];
        }
        self.cipher.write(offset, &buf);
    }
}

impl ByteFile for AesCtrFile {
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
    fn decrypts_what_it_encrypts() {
        let cipher = MemByteFile::new(64);
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let plain: Vec<u8> = (0u8..64).collect();

        let file = AesCtrFile::new(cipher, key, iv);
        file.write(0, &plain);
        assert_eq!(file.read(0, 64), plain);
    }

    #[test]
    fn counter_carries_within_low_half_but_never_touches_high_half() {
        let cipher = MemByteFile::new(16);
        let mut iv = [0u8; 16];
        iv[15] = 0xFF;
        iv[7] = 0x01; // high half sentinel: must stay untouched
        let file = AesCtrFile::new(cipher, [0u8; 16], iv);

        let counter = file.counter_bytes(1);
        assert_eq!(counter[15], 0x00, "low byte wraps from 0xFF");
        assert_eq!(counter[14], 0x01, "carry propagates into byte 14");
        assert_eq!(&counter[0..8], &iv[0..8], "high 8 bytes of the IV are never incremented");
    }

    #[test]
    fn different_block_indices_use_different_pads() {
        let cipher = MemByteFile::new(32);
        let key = [0x44u8; 16];
        let iv = [0u8; 16];
        let file = AesCtrFile::new(cipher, key, iv);
        file.write(0, &[0u8; 32]);
        let block0 = file.read(0, 16);
        let block1 = file.read(16, 16);
        assert_ne!(block0, block1, "distinct blocks must not share a keystream pad");
    }
}

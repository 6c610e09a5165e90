//! Thin wrappers around the RustCrypto primitives the stack needs: a single
//! AES-128 ECB block encryption (used to derive the CTR keystream pad, since
//! the counter-increment rule below isn't the textbook one a streaming CTR
//! cipher assumes), AES-CMAC for signed containers, and SHA-256 for the
//! integrity hash tree.

use aes::{Aes128, BlockEncrypt, NewBlockCipher};
use aes::cipher::generic_array::GenericArray;
use cmac::{Cmac, Mac, NewMac};
use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn aes_cmac(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut mac = Cmac::<Aes128>::new_varkey(key).expect("16-byte CMAC key");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn aes128_ecb_encrypt_block(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new_varkey(key).expect("16-byte AES key");
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    let mut out = [0u8; 16];
    out.copy_from_slice(&buf);
    out
}

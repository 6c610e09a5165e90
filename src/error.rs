//! Typed errors for the parts of the stack a caller can reasonably recover
//! from. Internal consistency violations (a corrupt FAT chain, a hash-bucket
//! cycle) stay as `panic!`/`assert!` — those indicate the image or the code
//! is wrong in a way no caller can act on, matching how the original treated
//! them as unconditional aborts.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("bad magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },
    #[error("unsupported version: {0:#010x}")]
    BadVersion(u32),
    #[error("reserved field was not zero")]
    ReservedFieldNonzero,
    #[error("partition count {0} out of range (expected 1 or 2)")]
    BadPartitionCount(u64),
    #[error("flag byte {0:#04x} out of range (expected 0 or 1)")]
    BadFlag(u8),
    #[error("IVFC main hash size mismatch: descriptor says {descriptor}, header says {header}")]
    IvfcHashSizeMismatch { descriptor: u64, header: u64 },
    #[error("data partition block count mismatch: header says {header}, FAT says {fat}")]
    DataBlockCountMismatch { header: u32, fat: u32 },
    #[error("AES-CMAC signature verification failed")]
    SignatureMismatch,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid hex in key {name}: {source}")]
    InvalidHex {
        name: String,
        #[source]
        source: hex::FromHexError,
    },
    #[error("movable.sed file too short to contain a key")]
    MovableKeyTruncated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error(transparent)]
    Container(#[from] ContainerError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

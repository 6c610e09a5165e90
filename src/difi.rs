//! Parses a DIFI descriptor into the nested DPFS(3 levels) + IVFC(5 levels)
//! stack it describes, yielding a single writable logical file. The DPFS
//! stack supplies the storage for the IVFC hash tree's middle levels (L1-L3)
//! and, when `external_ivfc_l4` is unset, for the body data itself; when set,
//! the body data lives directly in the outer container instead.

use crate::byte_file::{ByteFile, ByteFileRef, SubFile};
use crate::dpfs::DpfsLevel;
use crate::error::ContainerError;
use crate::ivfc::IvfcLevel;
use crate::util::FieldReader;

const DIFI_MAGIC: u32 = 0x4946_4944; // "DIFI"
const DIFI_VERSION: u32 = 0x0001_0000;
const DPFS_MAGIC: u32 = 0x5346_5044; // "DPFS"
const DPFS_VERSION: u32 = 0x0001_0000;
const IVFC_MAGIC: u32 = 0x4346_5649; // "IVFC"
const IVFC_VERSION: u32 = 0x0002_0000;

pub const DIFI_HEADER_SIZE: usize = 0x44;

fn check_magic(found: u32, expected: u32) -> Result<(), ContainerError> {
    if found != expected {
        return Err(ContainerError::BadMagic { expected, found });
    }
    Ok(())
}

fn check_version(found: u32, expected: u32) -> Result<(), ContainerError> {
    if found != expected {
        return Err(ContainerError::BadVersion(found));
    }
    Ok(())
}

/// `header` carries the DIFI/DPFS/IVFC descriptors plus the top-level (L0)
/// hash table; `body` carries the DPFS duplex pairs and (for an external L4)
/// the user data itself.
pub fn make_difi_file(header: ByteFileRef, body: ByteFileRef) -> Result<ByteFileRef, ContainerError> {
    let difi_header = header.read(0, DIFI_HEADER_SIZE);
    let mut r = FieldReader::new(&difi_header);
    check_magic(r.pop_u32(), DIFI_MAGIC)?;
    check_version(r.pop_u32(), DIFI_VERSION)?;
    let ivfc_desc_offset = r.pop_u64() as usize;
    let ivfc_desc_size = r.pop_u64() as usize;
    let dpfs_desc_offset = r.pop_u64() as usize;
    let dpfs_desc_size = r.pop_u64() as usize;
    let main_hash_offset = r.pop_u64() as usize;
    let main_hash_size = r.pop_u64() as usize;
    let external_ivfc_l4 = r.pop_u8();
    if external_ivfc_l4 > 1 {
        return Err(ContainerError::BadFlag(external_ivfc_l4));
    }
    let dpfs_selector = r.pop_u8();
    if dpfs_selector > 1 {
        return Err(ContainerError::BadFlag(dpfs_selector));
    }
    if r.pop_u16() != 0 {
        return Err(ContainerError::ReservedFieldNonzero);
    }
    let inner_ivfc_l4_offset_from_difi = r.pop_u64() as usize;

    // --- DPFS descriptor: three duplexed levels, the last holding the
    // IVFC hash-tree's own middle levels. ---
    let dpfs_desc = header.read(dpfs_desc_offset, dpfs_desc_size);
    let mut d = FieldReader::new(&dpfs_desc);
    check_magic(d.pop_u32(), DPFS_MAGIC)?;
    check_version(d.pop_u32(), DPFS_VERSION)?;

    let dpfs_l1_offset = d.pop_u64() as usize;
    let dpfs_l1_size = d.pop_u64() as usize;
    d.pop_u64(); // L1 block-size shift: L1 is a flat selector, not block-addressed.
    let dpfs_l1 = SubFile::new(body.clone(), dpfs_l1_offset + dpfs_l1_size * dpfs_selector as usize, dpfs_l1_size);

    let dpfs_l2_offset = d.pop_u64() as usize;
    let dpfs_l2_size = d.pop_u64() as usize;
    let dpfs_l2_block_size = 1usize << d.pop_u64();
    let dpfs_l2 = DpfsLevel::new(dpfs_l1, SubFile::new(body.clone(), dpfs_l2_offset, dpfs_l2_size * 2), dpfs_l2_block_size);

    let dpfs_l3_offset = d.pop_u64() as usize;
    let dpfs_l3_size = d.pop_u64() as usize;
    let dpfs_l3_block_size = 1usize << d.pop_u64();
    let dpfs_l3 = DpfsLevel::new(dpfs_l2, SubFile::new(body.clone(), dpfs_l3_offset, dpfs_l3_size * 2), dpfs_l3_block_size);

    // --- IVFC descriptor: five levels, L0 held directly in `header`. ---
    let ivfc_l0 = SubFile::new(header.clone(), main_hash_offset, main_hash_size);

    let ivfc_desc = header.read(ivfc_desc_offset, ivfc_desc_size);
    let mut v = FieldReader::new(&ivfc_desc);
    check_magic(v.pop_u32(), IVFC_MAGIC)?;
    check_version(v.pop_u32(), IVFC_VERSION)?;
    let descriptor_main_hash_size = v.pop_u64();
    if descriptor_main_hash_size != main_hash_size as u64 {
        return Err(ContainerError::IvfcHashSizeMismatch {
            descriptor: descriptor_main_hash_size,
            header: main_hash_size as u64,
        });
    }

    let ivfc_l1_offset = v.pop_u64() as usize;
    let ivfc_l1_size = v.pop_u64() as usize;
    let ivfc_l1_block_size = 1usize << v.pop_u64();
    let ivfc_l1 = IvfcLevel::new(ivfc_l0, SubFile::new(dpfs_l3.clone(), ivfc_l1_offset, ivfc_l1_size), ivfc_l1_block_size);

    let ivfc_l2_offset = v.pop_u64() as usize;
    let ivfc_l2_size = v.pop_u64() as usize;
    let ivfc_l2_block_size = 1usize << v.pop_u64();
    let ivfc_l2 = IvfcLevel::new(ivfc_l1, SubFile::new(dpfs_l3.clone(), ivfc_l2_offset, ivfc_l2_size), ivfc_l2_block_size);

    let ivfc_l3_offset = v.pop_u64() as usize;
    let ivfc_l3_size = v.pop_u64() as usize;
    let ivfc_l3_block_size = 1usize << v.pop_u64();
    let ivfc_l3 = IvfcLevel::new(ivfc_l2, SubFile::new(dpfs_l3.clone(), ivfc_l3_offset, ivfc_l3_size), ivfc_l3_block_size);

    let ivfc_l4_offset_internal = v.pop_u64() as usize;
    let ivfc_l4_size = v.pop_u64() as usize;
    let ivfc_l4_block_size = 1usize << v.pop_u64();

    let ivfc_l4_body = if external_ivfc_l4 != 0 {
        SubFile::new(body.clone(), inner_ivfc_l4_offset_from_difi, ivfc_l4_size)
    } else {
        SubFile::new(dpfs_l3, ivfc_l4_offset_internal, ivfc_l4_size)
    };
    let ivfc_l4 = IvfcLevel::new(ivfc_l3, ivfc_l4_body, ivfc_l4_block_size);

    Ok(ivfc_l4)
}

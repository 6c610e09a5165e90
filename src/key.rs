//! Key material: the `key=value` hex keyset format (unchanged from the
//! teacher's own `prod.keys`-style parser), plus the pieces specific to
//! this format — pulling the per-console device key out of a `movable.sed`
//! file, deriving its SD card directory name, and the key-scrambling step
//! used to turn a key-x/key-y pair into an AES key.

use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

use hex::FromHex;

use crate::crypto::sha256;
use crate::error::KeyError;

#[derive(Clone, Debug, Default)]
pub struct Keyset {
    pub header_key: [u8; 0x20],
    pub key_area_keys_application: Vec<[u8; 0x10]>,
    pub key_area_keys_ocean: Vec<[u8; 0x10]>,
    pub key_area_keys_system: Vec<[u8; 0x10]>,
}

impl Keyset {
    fn key_name_index(base_name: &str, name: &str) -> Option<usize> {
        if name.starts_with(base_name) && name.len() == base_name.len() + 2 {
            let idx_str = &name[name.len() - 2..];
            u8::from_str_radix(idx_str, 16).ok().map(|s| s as usize)
        } else {
            None
        }
    }

    fn set_indexed(slot: &mut Vec<[u8; 0x10]>, idx: usize, data: [u8; 0x10]) {
        if idx >= slot.len() {
            slot.resize(idx + 1, [0; 0x10]);
        }
        slot[idx] = data;
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, KeyError> {
        let mut keyset = Keyset::default();

        for line in BufReader::new(reader).lines() {
            let line = line?;
            let mut parts = line.splitn(2, '=');
            let (Some(raw_key), Some(raw_value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let name: String = raw_key.chars().filter(|c| !c.is_whitespace()).collect();
            let value: String = raw_value.chars().filter(|c| !c.is_whitespace()).collect();
            if name.is_empty() {
                continue;
            }

            let data = Vec::from_hex(&value).map_err(|source| KeyError::InvalidHex {
                name: name.clone(),
                source,
            })?;

            if name == "header_key" {
                keyset.header_key = data.try_into().map_err(|_| KeyError::InvalidHex {
                    name: name.clone(),
                    source: hex::FromHexError::InvalidStringLength,
                })?;
            } else if let Some(idx) = Self::key_name_index("key_area_key_application_", &name) {
                let data: [u8; 0x10] = data.try_into().map_err(|_| KeyError::InvalidHex {
                    name: name.clone(),
                    source: hex::FromHexError::InvalidStringLength,
                })?;
                Self::set_indexed(&mut keyset.key_area_keys_application, idx, data);
            } else if let Some(idx) = Self::key_name_index("key_area_key_ocean_", &name) {
                let data: [u8; 0x10] = data.try_into().map_err(|_| KeyError::InvalidHex {
                    name: name.clone(),
                    source: hex::FromHexError::InvalidStringLength,
                })?;
                Self::set_indexed(&mut keyset.key_area_keys_ocean, idx, data);
            } else if let Some(idx) = Self::key_name_index("key_area_key_system_", &name) {
                let data: [u8; 0x10] = data.try_into().map_err(|_| KeyError::InvalidHex {
                    name: name.clone(),
                    source: hex::FromHexError::InvalidStringLength,
                })?;
                Self::set_indexed(&mut keyset.key_area_keys_system, idx, data);
            } else {
                log::debug!("ignoring unrecognized keyset entry {name}");
            }
        }

        Ok(keyset)
    }
}

const MOVABLE_KEY_OFFSET: u64 = 0x110;

/// `movable.sed` stores the console-unique device key at a fixed offset;
/// everything before it is a signature/header this crate has no use for.
pub fn load_movable_key<R: Read + Seek>(mut reader: R) -> Result<[u8; 0x10], KeyError> {
    reader.seek(SeekFrom::Start(MOVABLE_KEY_OFFSET))?;
    let mut key = [0u8; 0x10];
    reader.read_exact(&mut key).map_err(|_| KeyError::MovableKeyTruncated)?;
    Ok(key)
}

/// The SD card directory a title's save data is mirrored under is derived
/// from the device key by hashing it and permuting the digest bytes into
/// the id0 folder name.
pub fn sd_directory_name(device_key: &[u8; 0x10]) -> String {
    const PERMUTATION: [usize; 16] = [0, 3, 6, 9, 12, 15, 2, 5, 8, 11, 14, 1, 4, 7, 10, 13];
    let digest = sha256(device_key);
    let mut permuted = [0u8; 16];
    for (out_idx, &in_idx) in PERMUTATION.iter().enumerate() {
        permuted[out_idx] = digest[in_idx];
    }
    hex::encode(permuted)
}

/// Key-x/key-y scrambling: `rol(key_x ^ key_y, 42) + scramble_constant`,
/// all as 128-bit operations, the same construction the 3DS keyslot engine
/// uses for every generated key. The real constant is proprietary and is
/// not embedded here; callers supply it (see the open question this
/// resolves, noted in the design ledger).
pub fn scramble_keyx_keyy(key_x: u128, key_y: u128, scramble_constant: u128) -> [u8; 0x10] {
    let rotated = (key_x ^ key_y).rotate_left(42);
    rotated.wrapping_add(scramble_constant).to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_header_and_indexed_keys() {
        let text = "header_key = 00112233445566778899aabbccddeeff00112233445566778899aabbccddee\n\
                     key_area_key_application_00=000102030405060708090a0b0c0d0e0f\n\
                     key_area_key_application_01=0f0e0d0c0b0a09080706050403020100\n";
        let keyset = Keyset::from_reader(Cursor::new(text)).unwrap();
        assert_eq!(keyset.header_key[0], 0x00);
        assert_eq!(keyset.key_area_keys_application.len(), 2);
        assert_eq!(keyset.key_area_keys_application[1][0], 0x0f);
    }

    #[test]
    fn rejects_malformed_hex() {
        let text = "header_key=not_hex\n";
        let result = Keyset::from_reader(Cursor::new(text));
        assert!(matches!(result, Err(KeyError::InvalidHex { .. })));
    }

    #[test]
    fn loads_movable_key_at_fixed_offset() {
        let mut data = vec![0u8; 0x120];
        let key = [0x42u8; 0x10];
        data[MOVABLE_KEY_OFFSET as usize..MOVABLE_KEY_OFFSET as usize + 0x10].copy_from_slice(&key);
        let loaded = load_movable_key(Cursor::new(data)).unwrap();
        assert_eq!(loaded, key);
    }

    #[test]
    fn truncated_movable_key_is_an_error() {
        let data = vec![0u8; 0x100];
        let result = load_movable_key(Cursor::new(data));
        assert!(matches!(result, Err(KeyError::MovableKeyTruncated)));
    }

    #[test]
    fn sd_directory_name_is_deterministic_and_key_dependent() {
        let name_a = sd_directory_name(&[1u8; 0x10]);
        let name_b = sd_directory_name(&[1u8; 0x10]);
        let name_c = sd_directory_name(&[2u8; 0x10]);
        assert_eq!(name_a, name_b);
        assert_ne!(name_a, name_c);
        assert_eq!(name_a.len(), 32);
    }

    #[test]
    fn scramble_is_key_order_sensitive_but_symmetric_in_xor() {
        let a = scramble_keyx_keyy(1, 2, 0x1234);
        let b = scramble_keyx_keyy(2, 1, 0x1234);
        assert_eq!(a, b, "xor is commutative, so swapping key_x/key_y must not change the result");
        let c = scramble_keyx_keyy(1, 2, 0x5678);
        assert_ne!(a, c);
    }
}

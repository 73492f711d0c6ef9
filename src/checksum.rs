//! CRC32C (Castagnoli) with the LevelDB masking scheme.
//!
//! Stored checksums are masked because computing the CRC of a string that
//! itself contains embedded CRCs is problematic.

use crc::{Crc, CRC_32_ISCSI};

const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
const MASK_DELTA: u32 = 0xa282_ead8;

pub fn value(data: &[u8]) -> u32 {
    CRC32C.checksum(data)
}

/// CRC of the concatenation of `parts`.
pub fn value_of(parts: &[&[u8]]) -> u32 {
    let mut digest = CRC32C.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}

pub fn mask(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

pub fn unmask(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

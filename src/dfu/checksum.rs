//! DfuSe file checksum.
//!
//! The DFU suffix stores the raw CRC-32 register (reflected polynomial
//! 0xEDB88320, initial value 0xFFFFFFFF) without the final inversion that
//! the common CRC-32 applies.

use crc::{Crc, CRC_32_JAMCRC};

const DFUSE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_JAMCRC);

/// Compute the DfuSe checksum over `data`.
pub fn checksum(data: &[u8]) -> u32 {
    DFUSE_CRC.checksum(data)
}

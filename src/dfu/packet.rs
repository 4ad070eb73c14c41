//! DfuSe command payloads and firmware block framing.
//!
//! DfuSe commands travel as DNLOAD payloads on block 0. Firmware data is
//! sent as fixed-size blocks numbered from 0, carried on wValue = n + 2.

use super::config::{
    BLOCK_PAD_BYTE, CMD_MASS_ERASE, CMD_READ_UNPROTECT, CMD_SET_ADDRESS_POINTER, FIRST_DATA_BLOCK,
};

// ============================================================================
// Command Payloads
// ============================================================================

/// Mass erase: erase the whole internal flash.
pub const MASS_ERASE_COMMAND: [u8; 1] = [CMD_MASS_ERASE];

/// Read unprotect: clear read protection (device erases and resets).
pub const READ_UNPROTECT_COMMAND: [u8; 1] = [CMD_READ_UNPROTECT];

/// Build a Set Address Pointer command.
///
/// Payload: [0x21, addr0, addr1, addr2, addr3] (little-endian address)
pub fn set_address_pointer_command(address: u32) -> [u8; 5] {
    let a = address.to_le_bytes();
    [CMD_SET_ADDRESS_POINTER, a[0], a[1], a[2], a[3]]
}

// ============================================================================
// Block Framing
// ============================================================================

/// wValue carrying firmware block `block_number`.
pub fn block_value(block_number: u16) -> u16 {
    block_number.wrapping_add(FIRST_DATA_BLOCK)
}

/// Split a payload into `block_size` blocks.
///
/// The final block is padded to full size with 0xFF, so every block has
/// exactly `block_size` bytes.
pub fn split_into_blocks(payload: &[u8], block_size: usize) -> Vec<Vec<u8>> {
    if block_size == 0 {
        return Vec::new();
    }

    payload
        .chunks(block_size)
        .map(|chunk| {
            let mut block = chunk.to_vec();
            block.resize(block_size, BLOCK_PAD_BYTE);
            block
        })
        .collect()
}

//! Configuration constants for the DfuSe protocol and the STM32 target.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// USB Device Identifiers
// ============================================================================

/// STMicroelectronics USB Vendor ID.
pub const STM32_VID: u16 = 0x0483;

/// Product ID of the STM32 system bootloader in DFU mode.
pub const STM32_DFU_PID: u16 = 0xDF11;

/// DFU interface claimed on the bootloader (only one alternate is supported).
pub const DFU_INTERFACE: u8 = 0;

// ============================================================================
// Control Request Framing
// ============================================================================

/// Class request directed at an interface, host-to-device.
pub const DFU_REQUEST_TYPE_OUT: u8 = 0x21;

/// Class request directed at an interface, device-to-host.
pub const DFU_REQUEST_TYPE_IN: u8 = DFU_REQUEST_TYPE_OUT | 0x80;

/// Standard request to the device, device-to-host.
pub const STANDARD_REQUEST_TYPE_IN: u8 = 0x80;

/// USB standard GET_DESCRIPTOR request.
pub const USB_REQ_GET_DESCRIPTOR: u8 = 0x06;

/// Descriptor type for the device descriptor (high byte of wValue).
pub const USB_DT_DEVICE: u16 = 0x01;

/// Descriptor type for string descriptors (high byte of wValue).
pub const USB_DT_STRING: u16 = 0x03;

/// Length of a standard device descriptor.
pub const DEVICE_DESCRIPTOR_LEN: usize = 18;

/// Offset of bcdDevice inside the device descriptor.
pub const BCD_DEVICE_OFFSET: usize = 12;

/// DFU class request codes used by this host (DNLOAD, GETSTATUS, CLRSTATUS).
///
/// UPLOAD, DETACH, GETSTATE and ABORT are never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DfuRequest {
    Download = 0x01,
    GetStatus = 0x03,
    ClearStatus = 0x04,
}

// ============================================================================
// DfuSe Commands (sent as DNLOAD payloads with wValue = 0)
// ============================================================================

/// Set Address Pointer command tag, followed by a little-endian address.
pub const CMD_SET_ADDRESS_POINTER: u8 = 0x21;

/// Mass erase command.
pub const CMD_MASS_ERASE: u8 = 0x41;

/// Read unprotect command. The device mass-erases and resets itself.
pub const CMD_READ_UNPROTECT: u8 = 0x92;

/// Block numbers 0 and 1 are reserved for commands, so payload blocks start at 2.
pub const FIRST_DATA_BLOCK: u16 = 2;

// ============================================================================
// Timeouts and Retries
// ============================================================================

/// Timeout for a single GETSTATUS transfer.
pub const GET_STATUS_TIMEOUT: Duration = Duration::from_millis(500);

/// Retries of a failed GETSTATUS transfer before giving up.
pub const GET_STATUS_RETRIES: u32 = 5;

/// Timeout for short command downloads (address pointer, erase, unprotect).
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(50);

/// Timeout for firmware block downloads. Zero waits indefinitely.
pub const BLOCK_DOWNLOAD_TIMEOUT: Duration = Duration::ZERO;

/// Timeout for CLRSTATUS. It runs on every idle and erase poll, so it must be finite.
pub const CLEAR_STATUS_TIMEOUT: Duration = Duration::from_millis(500);

/// Timeout for the flash-geometry string descriptor request.
pub const DESCRIPTOR_TIMEOUT: Duration = Duration::from_millis(500);

/// Maximum string descriptor length requested from the device.
pub const DESCRIPTOR_MAX_LEN: usize = 127;

/// Default settle time after toggling the board into another mode.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1000;

/// Default bound on wait-until-idle iterations.
pub const DEFAULT_IDLE_POLL_LIMIT: u32 = 50;

/// Default elapsed-time ceiling for mass erase polling.
pub const DEFAULT_ERASE_TIMEOUT_MS: u64 = 60_000;

/// Granularity of cancellable sleeps.
pub const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// DfuSe File Layout
// ============================================================================

/// DfuSe prefix signature.
pub const DFUSE_SIGNATURE: &[u8; 5] = b"DfuSe";

/// Supported DfuSe container version.
pub const DFUSE_VERSION: u8 = 1;

/// Target prefix signature.
pub const TARGET_SIGNATURE: &[u8; 6] = b"Target";

/// DFU suffix signature ("DFU" stored reversed).
pub const SUFFIX_SIGNATURE: &[u8; 3] = b"UFD";

/// Length of the DFU suffix, including the CRC.
pub const SUFFIX_LENGTH: usize = 16;

/// bcdDFU of a DfuSe suffix (0x011A), low byte first.
pub const SUFFIX_BCD_DFU: [u8; 2] = [0x1A, 0x01];

/// Prefix length: signature, version, image size, target count.
pub const PREFIX_LENGTH: usize = 11;

/// Offset of the target prefix signature.
pub const TARGET_SIGNATURE_OFFSET: usize = 11;

/// Offset of the alternate setting byte.
pub const TARGET_ALT_SETTING_OFFSET: usize = 17;

/// Offset of the "target named" flag.
pub const TARGET_NAMED_OFFSET: usize = 18;

/// Offset of the target name field.
pub const TARGET_NAME_OFFSET: usize = 22;

/// Width of the target name field.
pub const TARGET_NAME_WIDTH: usize = 255;

/// Offset of the target size field.
pub const TARGET_SIZE_OFFSET: usize = 277;

/// Offset of the element count field.
pub const TARGET_NUM_ELEMENTS_OFFSET: usize = 281;

/// Offset of the first element's start address.
pub const ELEMENT_ADDRESS_OFFSET: usize = 285;

/// Offset of the first element's length.
pub const ELEMENT_LENGTH_OFFSET: usize = 289;

/// Offset in the file where the first element's data starts.
pub const ELEMENT_DATA_OFFSET: usize = 293;

/// Smallest element accepted for programming.
pub const MIN_ELEMENT_LENGTH: u32 = 512;

/// Smallest buffer that holds every fixed field.
pub const MIN_FILE_LENGTH: usize = ELEMENT_DATA_OFFSET + SUFFIX_LENGTH;

/// Padding byte for the final partial block (erased flash value).
pub const BLOCK_PAD_BYTE: u8 = 0xFF;

// ============================================================================
// Target Profile
// ============================================================================

/// Flash geometry and identity of the supported target.
///
/// Defaults describe the STM32F042 internal flash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceProfile {
    pub vendor_id: u16,
    pub product_id: u16,
    pub flash_base: u32,
    pub flash_size: u32,
    /// Substring the flash-geometry string descriptor must contain.
    pub flash_descriptor: String,
    pub flash_descriptor_index: u8,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            vendor_id: STM32_VID,
            product_id: STM32_DFU_PID,
            flash_base: 0x0800_0000,
            flash_size: 32 * 1024,
            flash_descriptor: "@Internal Flash  /0x08000000/032*0001Kg".to_string(),
            flash_descriptor_index: 4,
        }
    }
}

impl DeviceProfile {
    /// First address past the end of internal flash.
    pub fn flash_end(&self) -> u64 {
        self.flash_base as u64 + self.flash_size as u64
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Transfer block size supported by a given bootloader version (bcdDevice).
pub fn max_block_size_for(bootloader_version: u16) -> Option<usize> {
    match bootloader_version {
        0x011A | 0x0200 => Some(1024),
        0x2100 | 0x2200 => Some(2048),
        _ => None,
    }
}

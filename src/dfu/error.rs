//! DFU error types for the DfuSe flashing engine.

use thiserror::Error;

use super::state::{DfuState, DfuStatusCode};

/// Result type alias for DFU operations.
pub type DfuResult<T> = Result<T, DfuError>;

/// Errors that can occur during DFU operations.
#[derive(Debug, Error)]
pub enum DfuError {
    /// Standard I/O error (firmware file, board reset node).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error for settings files.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A USB control transfer failed at the transport boundary.
    #[error("USB failed during {operation}: {source}")]
    Transfer {
        operation: &'static str,
        source: rusb::Error,
    },

    /// The firmware container is malformed.
    #[error("Invalid DfuSe file: {0}")]
    Format(#[from] FormatError),

    /// The firmware does not fit the attached device.
    #[error("Incompatible firmware: {0}")]
    Compatibility(#[from] CompatibilityError),

    /// The device left the expected state machine path.
    #[error("Unexpected device response: {0}")]
    Protocol(#[from] ProtocolError),

    /// The device is read-protected and must be mass erased first.
    #[error("Device is read-protected, run a mass erase before programming")]
    ReadProtected,

    /// No DFU device is open.
    #[error("Device is not connected or not in DFU mode")]
    NotConnected,

    /// No firmware file was given and none was found.
    #[error("No .dfu file found in {dir}")]
    NoFirmwareFile { dir: String },

    /// No USB device with the expected VID/PID is attached.
    #[error("No compatible device found")]
    NoDeviceFound,

    /// Operation was cancelled by user.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// The background worker running the operation died.
    #[error("DFU task failed: {0}")]
    Worker(String),
}

/// Violations of the DfuSe container format, in validation order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("file is {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("CRC failed: file says 0x{expected:08X}, computed 0x{actual:08X}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("file signature error")]
    BadSignature,

    #[error("DfuSe file version must be 1, got {0}")]
    UnsupportedVersion(u8),

    #[error("file suffix error")]
    BadSuffix,

    #[error("target signature error")]
    BadTargetSignature,

    #[error("no target name in file")]
    MissingTargetName,

    #[error("{0} elements in image, only one is supported")]
    UnsupportedMultiElement(u32),

    #[error("element size {0} is too small")]
    ElementTooSmall(u32),

    #[error("element of {length} bytes overruns the file ({available} bytes available)")]
    ElementOutOfBounds { length: u32, available: usize },
}

/// Mismatches between a valid image and the attached device.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompatibilityError {
    #[error("{field} mismatch: device 0x{device:04X}, image 0x{image:04X}")]
    IdentityMismatch {
        field: &'static str,
        device: u16,
        image: u16,
    },

    #[error("firmware starts at 0x{address:08X}, not at the beginning of internal flash (0x{flash_base:08X})")]
    UnsupportedTarget { address: u32, flash_base: u32 },

    #[error("could not retrieve internal flash string: {0}")]
    FlashDescriptorUnavailable(String),

    #[error("flash string \"{actual}\" does not describe \"{expected}\"")]
    FlashDescriptorMismatch { expected: String, actual: String },

    #[error("firmware image too large for target: ends at 0x{end:08X}, flash ends at 0x{limit:08X}")]
    ImageTooLarge { end: u64, limit: u64 },

    #[error("unsupported bootloader version 0x{0:04X}")]
    UnsupportedBootloader(u16),
}

/// Device answers that do not follow the DfuSe state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("device not idle after {attempts} polls (state {state})")]
    NotIdle { attempts: u32, state: DfuState },

    #[error("mass erase still running after {elapsed_ms} ms (state {state})")]
    EraseTimeout { elapsed_ms: u64, state: DfuState },

    #[error("failed to execute unprotect command (state {0})")]
    UnprotectRejected(DfuState),

    #[error("start address 0x{0:08X} not supported")]
    AddressRejected(u32),

    #[error("block {block} was not accepted (state {state})")]
    WriteNotAccepted { block: u16, state: DfuState },

    #[error("block {block} was not written ({status})")]
    WriteFailed { block: u16, status: DfuStatusCode },

    #[error("status response is {0} bytes, expected 6")]
    StatusTooShort(usize),

    #[error("block of {size} bytes exceeds negotiated maximum {max}")]
    BlockTooLarge { size: usize, max: usize },

    #[error("image needs {0} blocks, more than a DNLOAD block number can address")]
    TooManyBlocks(usize),
}

impl DfuError {
    /// Get a user-friendly error code for support purposes.
    pub fn error_code(&self) -> &'static str {
        match self {
            DfuError::Io(_) => "DFU-002",
            DfuError::Json(_) => "DFU-004",
            DfuError::Transfer { .. } => "DFU-001",
            DfuError::Format(_) => "DFU-010",
            DfuError::Compatibility(_) => "DFU-020",
            DfuError::Protocol(_) => "DFU-030",
            DfuError::ReadProtected => "DFU-040",
            DfuError::NotConnected => "DFU-050",
            DfuError::NoFirmwareFile { .. } => "DFU-060",
            DfuError::NoDeviceFound => "DFU-051",
            DfuError::Cancelled => "DFU-099",
            DfuError::Worker(_) => "DFU-098",
        }
    }
}

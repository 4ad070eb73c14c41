//! Device-reported DFU state and status, as read by GETSTATUS.

use std::fmt;

use super::error::ProtocolError;

/// Length of a GETSTATUS response.
pub const STATUS_LENGTH: usize = 6;

/// DFU device states (bState).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuState {
    AppIdle,
    AppDetach,
    DfuIdle,
    DownloadSync,
    DownloadBusy,
    DownloadIdle,
    ManifestSync,
    Manifest,
    ManifestWaitReset,
    UploadIdle,
    Error,
    /// A value outside the DFU 1.1 table.
    Unknown(u8),
}

impl DfuState {
    /// Parse a state from its wire value.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => DfuState::AppIdle,
            0x01 => DfuState::AppDetach,
            0x02 => DfuState::DfuIdle,
            0x03 => DfuState::DownloadSync,
            0x04 => DfuState::DownloadBusy,
            0x05 => DfuState::DownloadIdle,
            0x06 => DfuState::ManifestSync,
            0x07 => DfuState::Manifest,
            0x08 => DfuState::ManifestWaitReset,
            0x09 => DfuState::UploadIdle,
            0x0A => DfuState::Error,
            other => DfuState::Unknown(other),
        }
    }

    /// Wire value of this state.
    pub fn as_byte(&self) -> u8 {
        match self {
            DfuState::AppIdle => 0x00,
            DfuState::AppDetach => 0x01,
            DfuState::DfuIdle => 0x02,
            DfuState::DownloadSync => 0x03,
            DfuState::DownloadBusy => 0x04,
            DfuState::DownloadIdle => 0x05,
            DfuState::ManifestSync => 0x06,
            DfuState::Manifest => 0x07,
            DfuState::ManifestWaitReset => 0x08,
            DfuState::UploadIdle => 0x09,
            DfuState::Error => 0x0A,
            DfuState::Unknown(byte) => *byte,
        }
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DfuState::AppIdle => "appIDLE",
            DfuState::AppDetach => "appDETACH",
            DfuState::DfuIdle => "dfuIDLE",
            DfuState::DownloadSync => "dfuDNLOAD-SYNC",
            DfuState::DownloadBusy => "dfuDNBUSY",
            DfuState::DownloadIdle => "dfuDNLOAD-IDLE",
            DfuState::ManifestSync => "dfuMANIFEST-SYNC",
            DfuState::Manifest => "dfuMANIFEST",
            DfuState::ManifestWaitReset => "dfuMANIFEST-WAIT-RESET",
            DfuState::UploadIdle => "dfuUPLOAD-IDLE",
            DfuState::Error => "dfuERROR",
            DfuState::Unknown(byte) => return write!(f, "unknown(0x{:02X})", byte),
        };
        f.write_str(name)
    }
}

/// Result of the last operation (bStatus).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuStatusCode {
    Ok,
    ErrTarget,
    ErrFile,
    ErrWrite,
    ErrErase,
    ErrCheckErased,
    ErrProg,
    ErrVerify,
    ErrAddress,
    ErrNotDone,
    ErrFirmware,
    ErrVendor,
    ErrUsbReset,
    ErrPowerOnReset,
    ErrUnknown,
    ErrStalledPacket,
    Other(u8),
}

impl DfuStatusCode {
    /// Parse a status code from a byte value.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => DfuStatusCode::Ok,
            0x01 => DfuStatusCode::ErrTarget,
            0x02 => DfuStatusCode::ErrFile,
            0x03 => DfuStatusCode::ErrWrite,
            0x04 => DfuStatusCode::ErrErase,
            0x05 => DfuStatusCode::ErrCheckErased,
            0x06 => DfuStatusCode::ErrProg,
            0x07 => DfuStatusCode::ErrVerify,
            0x08 => DfuStatusCode::ErrAddress,
            0x09 => DfuStatusCode::ErrNotDone,
            0x0A => DfuStatusCode::ErrFirmware,
            0x0B => DfuStatusCode::ErrVendor,
            0x0C => DfuStatusCode::ErrUsbReset,
            0x0D => DfuStatusCode::ErrPowerOnReset,
            0x0E => DfuStatusCode::ErrUnknown,
            0x0F => DfuStatusCode::ErrStalledPacket,
            other => DfuStatusCode::Other(other),
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            DfuStatusCode::Ok => "No error condition is present",
            DfuStatusCode::ErrTarget => "File is not targeted for use by this device",
            DfuStatusCode::ErrFile => "File is for this device but fails a verification test",
            DfuStatusCode::ErrWrite => "Device is unable to write memory",
            DfuStatusCode::ErrErase => "Memory erase function failed",
            DfuStatusCode::ErrCheckErased => "Memory erase check failed",
            DfuStatusCode::ErrProg => "Program memory function failed",
            DfuStatusCode::ErrVerify => "Programmed memory failed verification",
            DfuStatusCode::ErrAddress => "Received address is out of range",
            DfuStatusCode::ErrNotDone => "Received DNLOAD with wLength = 0 too early",
            DfuStatusCode::ErrFirmware => "Device firmware is corrupt",
            DfuStatusCode::ErrVendor => "Vendor-specific error",
            DfuStatusCode::ErrUsbReset => "Device detected unexpected USB reset",
            DfuStatusCode::ErrPowerOnReset => "Device detected unexpected power on reset",
            DfuStatusCode::ErrUnknown => "Something went wrong",
            DfuStatusCode::ErrStalledPacket => "Device stalled an unexpected request",
            DfuStatusCode::Other(_) => "Unrecognized status code",
        }
    }
}

impl fmt::Display for DfuStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One GETSTATUS answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Outcome of the last operation.
    pub status: DfuStatusCode,
    /// State the device is in now.
    pub state: DfuState,
    /// Minimum wait before the next GETSTATUS is meaningful.
    pub poll_timeout_ms: u32,
}

impl DeviceStatus {
    /// Decode a GETSTATUS response.
    ///
    /// Layout: bStatus, bwPollTimeout (24-bit little-endian), bState, iString.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < STATUS_LENGTH {
            return Err(ProtocolError::StatusTooShort(data.len()));
        }

        Ok(Self {
            status: DfuStatusCode::from_byte(data[0]),
            state: DfuState::from_byte(data[4]),
            poll_timeout_ms: u32::from_le_bytes([data[1], data[2], data[3], 0]),
        })
    }
}

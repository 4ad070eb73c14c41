//! STM32 DfuSe (USB Device Firmware Upgrade) module.
//!
//! This module provides a Rust implementation of ST's DfuSe extensions
//! to USB DFU 1.1, for flashing STM32 parts through their system
//! bootloader.
//!
//! # Protocol Overview
//!
//! A Program run consists of:
//! 1. **Board Reset** - Drive BOOT0 and reset so the MCU starts its bootloader
//! 2. **Connect** - Open the bootloader by USB VID/PID
//! 3. **Protection Check** - Probe the flash base with Set Address Pointer
//! 4. **File Validation** - Parse the `.dfu` container and check its CRC
//! 5. **Compatibility** - Match VID/PID, flash geometry and bootloader version
//! 6. **Block Transfer** - DNLOAD the image in 1024 or 2048 byte blocks
//! 7. **Board Reset** - Restart into the application
//!
//! An Erase run replaces steps 4-7 with a mass erase, or with read unprotect
//! when the device is protected.
//!
//! # Example
//!
//! ```ignore
//! use dfu::{program_device, CancelToken, FirmwareSource, UpgradeOptions, UsbTransport};
//!
//! let options = UpgradeOptions::default();
//! let transport = UsbTransport::new(options.profile.vendor_id, options.profile.product_id);
//! program_device(
//!     transport,
//!     &SysfsBoardReset::default(),
//!     &FirmwareSource::File("firmware.dfu".into()),
//!     &options,
//!     &CancelToken::new(),
//!     |event| println!("{:?}", event),
//! )?;
//! ```

mod cancel;
mod checksum;
mod config;
mod device;
mod error;
mod firmware_builder;
mod firmware_reader;
mod packet;
mod protocol;
mod session;
mod state;
mod transport;
mod upgrade;

// Re-export public types and functions
// Only exports what's used by the commands and the test helpers

// Configuration
pub use config::DeviceProfile;

// Errors
pub use error::{DfuError, DfuResult};

// Device detection
pub use device::{find_dfu_devices, StmDfuDevice};

// Firmware files
#[cfg(test)]
pub use checksum::checksum;
pub use firmware_builder::{build_dfuse_file, DfuseImageSpec};
pub use firmware_reader::{read_dfu_file, FirmwareImage, FirmwareSource};

// Transport
#[cfg(test)]
pub use state::DfuState;
#[cfg(test)]
pub use transport::TransportResult;
pub use transport::{DfuTransport, UsbTransport};

// Runs
pub use cancel::CancelToken;
pub use session::{EraseOutcome, PollLimits};
pub use upgrade::{erase_device, program_device, DfuEvent, ProgramReport, UpgradeOptions};

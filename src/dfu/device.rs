//! Device detection for STM32 bootloaders in DFU mode.
//!
//! Lists USB devices matching the configured VID/PID.

use serde::{Deserialize, Serialize};

use super::transport::{read_bcd_device, version_to_bcd};

/// Information about a detected DFU device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StmDfuDevice {
    /// USB bus number.
    pub bus: u8,
    /// Address on the bus.
    pub address: u8,
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
    /// bcdDevice, i.e. the bootloader version.
    pub bootloader_version: u16,
    /// Product string (if readable).
    pub product_name: Option<String>,
    /// Serial number string (if readable).
    pub serial_number: Option<String>,
}

impl StmDfuDevice {
    /// Get a display label for this device.
    pub fn display_label(&self) -> String {
        let name = self
            .product_name
            .clone()
            .unwrap_or_else(|| "STM32 Bootloader".to_string());
        format!(
            "{} (bus {:03} device {:03}, bootloader 0x{:04X})",
            name, self.bus, self.address, self.bootloader_version
        )
    }
}

/// Find all connected devices with the given VID/PID.
///
/// Strings are read when the device can be opened. Enumeration errors
/// yield an empty list.
pub fn find_dfu_devices(vid: u16, pid: u16) -> Vec<StmDfuDevice> {
    let mut devices = Vec::new();

    let list = match rusb::devices() {
        Ok(list) => list,
        Err(e) => {
            log::warn!("USB enumeration failed: {}", e);
            return devices;
        }
    };

    for device in list.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(_) => continue,
        };
        if descriptor.vendor_id() != vid || descriptor.product_id() != pid {
            continue;
        }

        let decoded_version = version_to_bcd(descriptor.device_version());
        let (product_name, serial_number, bootloader_version) = match device.open() {
            Ok(handle) => (
                handle.read_product_string_ascii(&descriptor).ok(),
                handle.read_serial_number_string_ascii(&descriptor).ok(),
                read_bcd_device(&handle).unwrap_or(decoded_version),
            ),
            Err(e) => {
                log::debug!("Cannot open {:04X}:{:04X} for strings: {}", vid, pid, e);
                (None, None, decoded_version)
            }
        };

        devices.push(StmDfuDevice {
            bus: device.bus_number(),
            address: device.address(),
            vid: descriptor.vendor_id(),
            pid: descriptor.product_id(),
            bootloader_version,
            product_name,
            serial_number,
        });
    }

    devices
}

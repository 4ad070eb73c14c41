//! USB transport layer for DFU communication.
//!
//! Provides a trait-based abstraction over USB control transfers,
//! enabling both real hardware and simulated devices in tests.

use std::time::Duration;

use rusb::{DeviceHandle, GlobalContext, Version};

use super::config::{
    BCD_DEVICE_OFFSET, DESCRIPTOR_MAX_LEN, DESCRIPTOR_TIMEOUT, DEVICE_DESCRIPTOR_LEN,
    DFU_INTERFACE, STANDARD_REQUEST_TYPE_IN, USB_DT_DEVICE, USB_DT_STRING, USB_REQ_GET_DESCRIPTOR,
};

/// Result of a raw transfer. Callers attach context when lifting into `DfuError`.
pub type TransportResult<T> = Result<T, rusb::Error>;

/// Trait for DFU transport operations.
///
/// Control transfers carry the usual setup fields. A zero timeout waits
/// indefinitely.
pub trait DfuTransport: Send {
    /// Open and claim the DFU interface.
    fn connect(&mut self) -> TransportResult<()>;

    /// Whether `connect` succeeded and the interface is still claimed.
    fn is_connected(&self) -> bool;

    /// Release the interface and close the handle. Safe to call twice.
    fn release(&mut self);

    /// Host-to-device control transfer.
    ///
    /// # Returns
    /// Number of bytes sent
    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize>;

    /// Device-to-host control transfer.
    ///
    /// # Returns
    /// Number of bytes received into `buffer`
    fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize>;

    /// idVendor of the connected device.
    fn vendor_id(&self) -> u16;

    /// idProduct of the connected device.
    fn product_id(&self) -> u16;

    /// bcdDevice of the connected device, i.e. the bootloader version.
    fn device_version(&self) -> u16;

    /// Raw string descriptor `index`, header included.
    ///
    /// Requested with language ID 0, as the STM32 bootloader expects.
    fn string_descriptor(&mut self, index: u8) -> TransportResult<Vec<u8>> {
        let mut buffer = vec![0u8; DESCRIPTOR_MAX_LEN];
        let value = (USB_DT_STRING << 8) | index as u16;
        let len = self.control_in(
            STANDARD_REQUEST_TYPE_IN,
            USB_REQ_GET_DESCRIPTOR,
            value,
            0,
            &mut buffer,
            DESCRIPTOR_TIMEOUT,
        )?;
        buffer.truncate(len);
        Ok(buffer)
    }
}

impl<T: DfuTransport + ?Sized> DfuTransport for &mut T {
    fn connect(&mut self) -> TransportResult<()> {
        (**self).connect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        (**self).control_out(request_type, request, value, index, data, timeout)
    }

    fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        (**self).control_in(request_type, request, value, index, buffer, timeout)
    }

    fn vendor_id(&self) -> u16 {
        (**self).vendor_id()
    }

    fn product_id(&self) -> u16 {
        (**self).product_id()
    }

    fn device_version(&self) -> u16 {
        (**self).device_version()
    }

    fn string_descriptor(&mut self, index: u8) -> TransportResult<Vec<u8>> {
        (**self).string_descriptor(index)
    }
}

/// libusb-backed transport for the STM32 system bootloader.
pub struct UsbTransport {
    vendor_id: u16,
    product_id: u16,
    device_version: u16,
    handle: Option<DeviceHandle<GlobalContext>>,
}

impl UsbTransport {
    /// Transport for the first device matching `vendor_id`/`product_id`.
    ///
    /// Nothing is opened until `connect`.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            device_version: 0,
            handle: None,
        }
    }

    fn handle(&self) -> TransportResult<&DeviceHandle<GlobalContext>> {
        self.handle.as_ref().ok_or(rusb::Error::NoDevice)
    }

    fn open(&self) -> TransportResult<(DeviceHandle<GlobalContext>, u16)> {
        let handle = rusb::open_device_with_vid_pid(self.vendor_id, self.product_id)
            .ok_or(rusb::Error::NoDevice)?;
        let device_version = read_bcd_device(&handle)?;

        // Not supported on every platform.
        handle.set_auto_detach_kernel_driver(true).ok();
        handle.claim_interface(DFU_INTERFACE)?;

        Ok((handle, device_version))
    }
}

impl DfuTransport for UsbTransport {
    fn connect(&mut self) -> TransportResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }

        // The bootloader may still be enumerating right after a board reset.
        const MAX_OPEN_RETRIES: u32 = 5;
        const RETRY_DELAY_MS: u64 = 200;

        let mut last_error = rusb::Error::NoDevice;
        for attempt in 0..MAX_OPEN_RETRIES {
            match self.open() {
                Ok((handle, device_version)) => {
                    log::debug!(
                        "Opened {:04X}:{:04X} (bcdDevice 0x{:04X})",
                        self.vendor_id,
                        self.product_id,
                        device_version
                    );
                    self.device_version = device_version;
                    self.handle = Some(handle);
                    return Ok(());
                }
                Err(e) => {
                    let transient = matches!(
                        e,
                        rusb::Error::NoDevice | rusb::Error::Busy | rusb::Error::Interrupted
                    );
                    last_error = e;
                    if !transient || attempt == MAX_OPEN_RETRIES - 1 {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                }
            }
        }

        Err(last_error)
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release_interface(DFU_INTERFACE).ok();
            log::debug!("Released {:04X}:{:04X}", self.vendor_id, self.product_id);
        }
    }

    fn control_out(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        self.handle()?
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn control_in(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<usize> {
        self.handle()?
            .read_control(request_type, request, value, index, buffer, timeout)
    }

    fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.product_id
    }

    fn device_version(&self) -> u16 {
        self.device_version
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        self.release();
    }
}

/// bcdDevice straight from the device descriptor.
///
/// rusb's `Version` folds the high byte into a decimal major number, which
/// cannot tell 0x1B00 from 0x2100.
pub(crate) fn read_bcd_device(handle: &DeviceHandle<GlobalContext>) -> TransportResult<u16> {
    let mut buffer = [0u8; DEVICE_DESCRIPTOR_LEN];
    let len = handle.read_control(
        STANDARD_REQUEST_TYPE_IN,
        USB_REQ_GET_DESCRIPTOR,
        USB_DT_DEVICE << 8,
        0,
        &mut buffer,
        DESCRIPTOR_TIMEOUT,
    )?;
    bcd_device_from_descriptor(&buffer[..len]).ok_or(rusb::Error::Other)
}

/// bcdDevice of a raw device descriptor, if it is long enough.
pub(crate) fn bcd_device_from_descriptor(raw: &[u8]) -> Option<u16> {
    let bytes = raw.get(BCD_DEVICE_OFFSET..BCD_DEVICE_OFFSET + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Re-encode a decoded USB version as BCD.
///
/// Lossy when a major-version nibble is above 9. Only used for listing
/// devices that cannot be opened.
pub(crate) fn version_to_bcd(version: Version) -> u16 {
    let major = version.major() as u16;
    let minor = version.minor() as u16 & 0x0F;
    let sub_minor = version.sub_minor() as u16 & 0x0F;

    ((major / 10) << 12) | ((major % 10) << 8) | (minor << 4) | sub_minor
}

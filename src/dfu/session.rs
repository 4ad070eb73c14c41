//! DfuSe device session: the state machine built from the request primitives.
//!
//! Each operation drives the bootloader through DNLOAD/GETSTATUS/CLRSTATUS
//! and checks the state it lands in. Every wait loop is bounded and checks
//! the cancel token between transfers.

use std::time::{Duration, Instant};

use super::cancel::CancelToken;
use super::config::{
    max_block_size_for, DeviceProfile, DEFAULT_ERASE_TIMEOUT_MS, DEFAULT_IDLE_POLL_LIMIT,
};
use super::error::{CompatibilityError, DfuError, DfuResult, ProtocolError};
use super::firmware_reader::FirmwareImage;
use super::packet::{MASS_ERASE_COMMAND, READ_UNPROTECT_COMMAND};
use super::protocol::DfuProtocol;
use super::state::{DeviceStatus, DfuState};
use super::transport::DfuTransport;

/// Bounds for the device polling loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollLimits {
    /// CLRSTATUS/GETSTATUS rounds allowed while waiting for dfuIDLE.
    pub idle_poll_limit: u32,
    /// Ceiling on the time a mass erase may keep the device busy.
    pub erase_timeout: Duration,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            idle_poll_limit: DEFAULT_IDLE_POLL_LIMIT,
            erase_timeout: Duration::from_millis(DEFAULT_ERASE_TIMEOUT_MS),
        }
    }
}

/// How a mass erase request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseOutcome {
    /// Flash erased, device back in dfuIDLE.
    Erased,
    /// The device was read-protected. Unprotect was sent, the device is
    /// resetting itself and the transport has been released.
    ProtectionRemoved,
}

/// Parameters agreed with the device by `check_compatibility`.
///
/// Only `check_compatibility` creates one, so a block write always runs
/// against a checked image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParams {
    bootloader_version: u16,
    max_block_size: usize,
}

impl TransferParams {
    /// bcdDevice of the connected bootloader.
    pub fn bootloader_version(&self) -> u16 {
        self.bootloader_version
    }

    /// Bytes per DNLOAD block.
    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }
}

/// One connection to an STM32 DfuSe bootloader.
pub struct DfuSession<T: DfuTransport> {
    protocol: DfuProtocol<T>,
    profile: DeviceProfile,
    limits: PollLimits,
    cancel: CancelToken,
}

impl<T: DfuTransport> DfuSession<T> {
    pub fn new(
        transport: T,
        profile: DeviceProfile,
        limits: PollLimits,
        cancel: CancelToken,
    ) -> Self {
        Self {
            protocol: DfuProtocol::new(transport),
            profile,
            limits,
            cancel,
        }
    }

    /// Open the device. Failure is reported, not fatal: callers check
    /// `is_connected` afterwards.
    pub fn connect(&mut self) -> DfuResult<()> {
        self.protocol
            .transport_mut()
            .connect()
            .map_err(|source| DfuError::Transfer {
                operation: "connect",
                source,
            })
    }

    pub fn is_connected(&self) -> bool {
        self.protocol.transport().is_connected()
    }

    /// Clear status and poll until the device reports dfuIDLE.
    pub fn wait_until_idle(&mut self) -> DfuResult<DeviceStatus> {
        let limit = self.limits.idle_poll_limit.max(1);
        let mut state = DfuState::DfuIdle;

        for _ in 0..limit {
            self.cancel.check()?;
            self.protocol.clear_status()?;
            let status = self.protocol.get_status()?;
            if status.state == DfuState::DfuIdle {
                return Ok(status);
            }
            state = status.state;
        }

        Err(ProtocolError::NotIdle {
            attempts: limit,
            state,
        }
        .into())
    }

    /// Return to dfuIDLE unless the last status already says so.
    fn drain_to_idle(&mut self, last: DeviceStatus) -> DfuResult<()> {
        if last.state != DfuState::DfuIdle {
            self.wait_until_idle()?;
        }
        Ok(())
    }

    /// Probe read protection by pointing at the start of flash.
    ///
    /// A protected device refuses the address and lands in dfuERROR. The
    /// device is returned to dfuIDLE either way.
    pub fn is_device_protected(&mut self) -> DfuResult<bool> {
        self.wait_until_idle()?;

        self.protocol.set_address_pointer(self.profile.flash_base)?;
        // The first read executes the command, the second reports the outcome.
        self.protocol.get_status()?;
        let status = self.protocol.get_status()?;

        let protected = status.state == DfuState::Error;
        self.drain_to_idle(status)?;

        if protected {
            log::warn!("Device is read-protected");
        }
        Ok(protected)
    }

    /// Send read unprotect and let go of the device.
    ///
    /// The bootloader erases flash and resets, so the transport is released
    /// here and the session cannot be used again without reconnecting.
    pub fn remove_read_protection(&mut self) -> DfuResult<()> {
        self.protocol.download(&READ_UNPROTECT_COMMAND)?;
        let status = self.protocol.get_status()?;
        if status.state != DfuState::DownloadBusy {
            return Err(ProtocolError::UnprotectRejected(status.state).into());
        }

        self.protocol.transport_mut().release();
        log::info!("USB was released, device resets after unprotect");
        Ok(())
    }

    /// Erase the whole internal flash.
    ///
    /// A read-protected device is unprotected instead, which also erases it.
    /// While erasing, the device is polled no faster than the bwPollTimeout
    /// it reports right after the command.
    pub fn mass_erase(&mut self) -> DfuResult<EraseOutcome> {
        self.wait_until_idle()?;

        if self.is_device_protected()? {
            self.remove_read_protection()?;
            return Ok(EraseOutcome::ProtectionRemoved);
        }

        let started = Instant::now();
        self.protocol.download(&MASS_ERASE_COMMAND)?;
        let status = self.protocol.get_status()?;
        let poll_interval = Duration::from_millis(status.poll_timeout_ms as u64);
        log::debug!("Mass erase started, polling every {} ms", status.poll_timeout_ms);

        loop {
            self.cancel.sleep(poll_interval)?;
            self.protocol.clear_status()?;
            let status = self.protocol.get_status()?;
            if status.state == DfuState::DfuIdle {
                break;
            }

            let elapsed = started.elapsed();
            if elapsed >= self.limits.erase_timeout {
                return Err(ProtocolError::EraseTimeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    state: status.state,
                }
                .into());
            }
        }

        Ok(EraseOutcome::Erased)
    }

    /// Check that `image` can be written to the connected device.
    ///
    /// # Returns
    /// The block size and bootloader version to use for the transfer
    pub fn check_compatibility(&mut self, image: &FirmwareImage) -> DfuResult<TransferParams> {
        let device_vid = self.protocol.transport().vendor_id();
        let device_pid = self.protocol.transport().product_id();
        let device_version = self.protocol.transport().device_version();

        if image.vendor_id != device_vid {
            return Err(CompatibilityError::IdentityMismatch {
                field: "vendor id",
                device: device_vid,
                image: image.vendor_id,
            }
            .into());
        }
        if image.product_id != device_pid {
            return Err(CompatibilityError::IdentityMismatch {
                field: "product id",
                device: device_pid,
                image: image.product_id,
            }
            .into());
        }

        if image.element_start_address != self.profile.flash_base {
            return Err(CompatibilityError::UnsupportedTarget {
                address: image.element_start_address,
                flash_base: self.profile.flash_base,
            }
            .into());
        }

        let descriptor = self
            .protocol
            .read_flash_descriptor(self.profile.flash_descriptor_index)
            .map_err(|e| CompatibilityError::FlashDescriptorUnavailable(e.to_string()))?;
        if !descriptor.contains(&self.profile.flash_descriptor) {
            return Err(CompatibilityError::FlashDescriptorMismatch {
                expected: self.profile.flash_descriptor.clone(),
                actual: descriptor,
            }
            .into());
        }

        let end = image.element_start_address as u64 + image.element_length as u64;
        if end >= self.profile.flash_end() {
            return Err(CompatibilityError::ImageTooLarge {
                end,
                limit: self.profile.flash_end(),
            }
            .into());
        }

        let max_block_size = max_block_size_for(device_version)
            .ok_or(CompatibilityError::UnsupportedBootloader(device_version))?;

        log::info!("Firmware ok and compatible");
        Ok(TransferParams {
            bootloader_version: device_version,
            max_block_size,
        })
    }

    /// Program one block.
    ///
    /// Block 0 first sets the address pointer to `address`. Later blocks
    /// follow on from it. The device must go busy on the first status read
    /// and must not report an error on the second.
    pub fn write_block(
        &mut self,
        params: &TransferParams,
        address: u32,
        block: &[u8],
        block_number: u16,
    ) -> DfuResult<()> {
        if block.len() > params.max_block_size {
            return Err(ProtocolError::BlockTooLarge {
                size: block.len(),
                max: params.max_block_size,
            }
            .into());
        }

        self.wait_until_idle()?;

        if block_number == 0 {
            self.protocol.set_address_pointer(address)?;
            self.protocol.get_status()?;
            let status = self.protocol.get_status()?;
            if status.state == DfuState::Error {
                return Err(ProtocolError::AddressRejected(address).into());
            }
        }

        self.wait_until_idle()?;

        self.protocol.download_block(block_number, block)?;
        let status = self.protocol.get_status()?;
        if status.state != DfuState::DownloadBusy {
            return Err(ProtocolError::WriteNotAccepted {
                block: block_number,
                state: status.state,
            }
            .into());
        }

        let status = self.protocol.get_status()?;
        if status.state == DfuState::Error {
            return Err(ProtocolError::WriteFailed {
                block: block_number,
                status: status.status,
            }
            .into());
        }

        self.drain_to_idle(status)
    }
}

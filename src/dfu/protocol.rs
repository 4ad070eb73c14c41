//! DFU request primitives for the STM32 DfuSe bootloader.
//!
//! Every request goes to the DFU interface with a class request type. Only
//! GETSTATUS reads data back, and only GETSTATUS retries on transport errors.

use super::config::{
    DfuRequest, BLOCK_DOWNLOAD_TIMEOUT, CLEAR_STATUS_TIMEOUT, COMMAND_TIMEOUT, DFU_INTERFACE,
    DFU_REQUEST_TYPE_IN, DFU_REQUEST_TYPE_OUT, GET_STATUS_RETRIES, GET_STATUS_TIMEOUT,
};
use super::error::{DfuError, DfuResult};
use super::packet::{block_value, set_address_pointer_command};
use super::state::{DeviceStatus, STATUS_LENGTH};
use super::transport::DfuTransport;

/// DfuSe request layer over a transport.
pub struct DfuProtocol<T: DfuTransport> {
    transport: T,
}

impl<T: DfuTransport> DfuProtocol<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// CLRSTATUS: leave dfuERROR and return to dfuIDLE.
    pub fn clear_status(&mut self) -> DfuResult<()> {
        self.transport
            .control_out(
                DFU_REQUEST_TYPE_OUT,
                DfuRequest::ClearStatus as u8,
                0,
                DFU_INTERFACE as u16,
                &[],
                CLEAR_STATUS_TIMEOUT,
            )
            .map_err(|source| DfuError::Transfer {
                operation: "clear status",
                source,
            })?;
        Ok(())
    }

    /// GETSTATUS, retried on transport failure.
    ///
    /// Reading status is also what makes the device execute a pending
    /// download, so callers issue it after every DNLOAD.
    pub fn get_status(&mut self) -> DfuResult<DeviceStatus> {
        let mut buffer = [0u8; STATUS_LENGTH];
        let mut retries = 0;

        loop {
            match self.transport.control_in(
                DFU_REQUEST_TYPE_IN,
                DfuRequest::GetStatus as u8,
                0,
                DFU_INTERFACE as u16,
                &mut buffer,
                GET_STATUS_TIMEOUT,
            ) {
                Ok(len) => {
                    let status = DeviceStatus::parse(&buffer[..len])?;
                    log::trace!(
                        "GETSTATUS: state 0x{:02X} ({}), status {}, poll {} ms",
                        status.state.as_byte(),
                        status.state,
                        status.status,
                        status.poll_timeout_ms
                    );
                    return Ok(status);
                }
                Err(e) if retries < GET_STATUS_RETRIES => {
                    retries += 1;
                    log::debug!(
                        "GETSTATUS failed ({}), retry {}/{}",
                        e,
                        retries,
                        GET_STATUS_RETRIES
                    );
                }
                Err(source) => {
                    return Err(DfuError::Transfer {
                        operation: "get status",
                        source,
                    })
                }
            }
        }
    }

    /// DNLOAD a DfuSe command on block 0.
    pub fn download(&mut self, payload: &[u8]) -> DfuResult<()> {
        self.transport
            .control_out(
                DFU_REQUEST_TYPE_OUT,
                DfuRequest::Download as u8,
                0,
                DFU_INTERFACE as u16,
                payload,
                COMMAND_TIMEOUT,
            )
            .map_err(|source| DfuError::Transfer {
                operation: "command download",
                source,
            })?;
        Ok(())
    }

    /// DNLOAD firmware block `block_number` (wValue = block_number + 2).
    pub fn download_block(&mut self, block_number: u16, data: &[u8]) -> DfuResult<()> {
        self.transport
            .control_out(
                DFU_REQUEST_TYPE_OUT,
                DfuRequest::Download as u8,
                block_value(block_number),
                DFU_INTERFACE as u16,
                data,
                BLOCK_DOWNLOAD_TIMEOUT,
            )
            .map_err(|source| DfuError::Transfer {
                operation: "firmware download",
                source,
            })?;
        Ok(())
    }

    /// Point the next block download at `address`.
    pub fn set_address_pointer(&mut self, address: u32) -> DfuResult<()> {
        self.download(&set_address_pointer_command(address))
    }

    /// Fetch and decode the flash-geometry string descriptor.
    pub fn read_flash_descriptor(&mut self, index: u8) -> DfuResult<String> {
        let raw = self
            .transport
            .string_descriptor(index)
            .map_err(|source| DfuError::Transfer {
                operation: "get descriptor",
                source,
            })?;
        Ok(decode_string_descriptor(&raw))
    }
}

/// Decode a USB string descriptor (bLength, bDescriptorType, UTF-16LE text).
pub fn decode_string_descriptor(raw: &[u8]) -> String {
    if raw.len() < 2 {
        return String::new();
    }

    let declared = (raw[0] as usize).clamp(2, raw.len());
    let units: Vec<u16> = raw[2..declared]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();

    String::from_utf16_lossy(&units)
}

//! Erase and Program runs against an STM32 on a board with a reset controller.
//!
//! Each run:
//! 1. **Board reset** - Toggle the MCU into its DFU bootloader and let it settle
//! 2. **Connect** - Open the bootloader over USB
//! 3. **Protection check** - Read-protected devices can only be erased
//! 4. **Erase** or **Program** - Mass erase, or validate and write the image
//! 5. **Board reset** - Back to the application after programming
//!
//! Progress and log lines go to a single observer callback in order. A
//! failed run is reported as one log line and returned as an error.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::cancel::CancelToken;
use super::config::{DeviceProfile, DEFAULT_SETTLE_DELAY_MS, FIRST_DATA_BLOCK};
use super::error::{DfuError, DfuResult, ProtocolError};
use super::firmware_reader::{verify_dfu_bytes, FirmwareSource};
use super::packet::split_into_blocks;
use super::session::{DfuSession, EraseOutcome, PollLimits};
use super::transport::DfuTransport;
use crate::traits::BoardReset;

/// Events delivered to the observer during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum DfuEvent {
    /// Human-readable status line.
    Log { message: String },
    /// Blocks written so far, in percent.
    Progress { percent: u8 },
}

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    pub profile: DeviceProfile,
    /// Wait after toggling the board mode, before touching USB.
    pub settle_delay: Duration,
    pub limits: PollLimits,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            profile: DeviceProfile::default(),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            limits: PollLimits::default(),
        }
    }
}

/// What a successful Program run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramReport {
    pub firmware: PathBuf,
    pub blocks_written: usize,
    pub elapsed: Duration,
}

/// Log line to both the observer and the process logger.
fn emit_log<F: Fn(DfuEvent)>(on_event: &F, message: impl Into<String>) {
    let message = message.into();
    log::info!("{}", message);
    on_event(DfuEvent::Log { message });
}

/// Reset into DFU mode, settle and connect.
///
/// A failing reset controller is logged and the connect is attempted anyway.
fn open_in_dfu_mode<T, F>(
    transport: T,
    reset: &dyn BoardReset,
    options: &UpgradeOptions,
    cancel: &CancelToken,
    on_event: &F,
) -> DfuResult<DfuSession<T>>
where
    T: DfuTransport,
    F: Fn(DfuEvent),
{
    emit_log(on_event, "Resetting device to DFU mode");
    if let Err(e) = reset.enter_dfu_mode() {
        log::warn!("Board reset to DFU mode failed: {}", e);
        emit_log(on_event, format!("Board reset failed: {}", e));
    }
    cancel.sleep(options.settle_delay)?;

    let mut session = DfuSession::new(
        transport,
        options.profile.clone(),
        options.limits,
        cancel.clone(),
    );
    if let Err(e) = session.connect() {
        log::debug!("Connect failed: {}", e);
    }
    Ok(session)
}

/// Mass erase the device.
///
/// # Arguments
/// * `transport` - USB transport for the bootloader
/// * `reset` - Board reset controller
/// * `options` - Device profile, settle delay and poll bounds
/// * `cancel` - Checked between transfers and during waits
/// * `on_event` - Observer for log and progress events
///
/// # Returns
/// `ProtectionRemoved` when the device was read-protected. It then resets
/// on its own and must re-enumerate before the next run.
pub fn erase_device<T, F>(
    transport: T,
    reset: &dyn BoardReset,
    options: &UpgradeOptions,
    cancel: &CancelToken,
    on_event: F,
) -> DfuResult<EraseOutcome>
where
    T: DfuTransport,
    F: Fn(DfuEvent),
{
    let result = run_erase(transport, reset, options, cancel, &on_event);
    if let Err(e) = &result {
        emit_log(&on_event, format!("Mass erase failed: {}", e));
    }
    result
}

fn run_erase<T, F>(
    transport: T,
    reset: &dyn BoardReset,
    options: &UpgradeOptions,
    cancel: &CancelToken,
    on_event: &F,
) -> DfuResult<EraseOutcome>
where
    T: DfuTransport,
    F: Fn(DfuEvent),
{
    let mut session = open_in_dfu_mode(transport, reset, options, cancel, on_event)?;
    if !session.is_connected() {
        emit_log(on_event, "STM32 device is not connected or not in DFU mode");
        return Err(DfuError::NotConnected);
    }

    let started = Instant::now();
    emit_log(on_event, "Getting status of STM32 device...");
    session.wait_until_idle()?;
    emit_log(on_event, "STM32 device is idle");

    emit_log(on_event, "Sending mass erase command");
    let outcome = session.mass_erase()?;
    match outcome {
        EraseOutcome::ProtectionRemoved => emit_log(
            on_event,
            "Read protection removed. Device resets, wait until it re-enumerates",
        ),
        EraseOutcome::Erased => emit_log(
            on_event,
            format!(
                "Mass erase completed in {} ms",
                started.elapsed().as_millis()
            ),
        ),
    }
    Ok(outcome)
}

/// Write a `.dfu` image to the device and restart it into the application.
///
/// # Arguments
/// * `transport` - USB transport for the bootloader
/// * `reset` - Board reset controller
/// * `source` - Explicit firmware file or directory to search
/// * `options` - Device profile, settle delay and poll bounds
/// * `cancel` - Checked between transfers and during waits
/// * `on_event` - Observer for log and progress events
pub fn program_device<T, F>(
    transport: T,
    reset: &dyn BoardReset,
    source: &FirmwareSource,
    options: &UpgradeOptions,
    cancel: &CancelToken,
    on_event: F,
) -> DfuResult<ProgramReport>
where
    T: DfuTransport,
    F: Fn(DfuEvent),
{
    on_event(DfuEvent::Progress { percent: 0 });
    let result = run_program(transport, reset, source, options, cancel, &on_event);
    if let Err(e) = &result {
        emit_log(&on_event, format!("Programming failed: {}", e));
    }
    result
}

fn run_program<T, F>(
    transport: T,
    reset: &dyn BoardReset,
    source: &FirmwareSource,
    options: &UpgradeOptions,
    cancel: &CancelToken,
    on_event: &F,
) -> DfuResult<ProgramReport>
where
    T: DfuTransport,
    F: Fn(DfuEvent),
{
    let mut session = open_in_dfu_mode(transport, reset, options, cancel, on_event)?;
    if !session.is_connected() {
        emit_log(on_event, "STM32 device is not connected or not in DFU mode");
        emit_log(on_event, "Try mass erase before programming");
        return Err(DfuError::NotConnected);
    }

    if session.is_device_protected()? {
        return Err(DfuError::ReadProtected);
    }

    emit_log(on_event, "Reading firmware...");
    let path = source.resolve()?;
    let raw = std::fs::read(&path)?;

    emit_log(on_event, "Verifying firmware...");
    let image = verify_dfu_bytes(&path, raw)?;

    emit_log(on_event, "Checking compatibility...");
    let params = session.check_compatibility(&image)?;
    if params.bootloader_version() != image.bootloader_version {
        emit_log(
            on_event,
            format!(
                "Warning: device bootloader 0x{:04X}, file bootloader 0x{:04X}",
                params.bootloader_version(),
                image.bootloader_version
            ),
        );
    }

    emit_log(on_event, format!("File path: {}", path.display()));
    emit_log(on_event, format!("File size: {} bytes", image.raw_bytes().len()));
    emit_log(
        on_event,
        format!("Element address: 0x{:08X}", image.element_start_address),
    );
    emit_log(on_event, format!("Element size: {} bytes", image.element_length));
    emit_log(
        on_event,
        format!("Writing file in blocks of {} bytes", params.max_block_size()),
    );

    let started = Instant::now();
    let blocks = split_into_blocks(image.payload(), params.max_block_size());
    let total = blocks.len();
    if total > usize::from(u16::MAX - FIRST_DATA_BLOCK) {
        return Err(ProtocolError::TooManyBlocks(total).into());
    }
    emit_log(on_event, format!("Blocks to be written: {}", total));

    for (index, block) in blocks.iter().enumerate() {
        session.write_block(&params, image.element_start_address, block, index as u16)?;

        let percent = ((index + 1) * 100 / total) as u8;
        on_event(DfuEvent::Progress { percent });
    }

    let elapsed = started.elapsed();
    emit_log(
        on_event,
        format!("Programming completed in {} ms", elapsed.as_millis()),
    );

    emit_log(on_event, "Resetting device to normal mode");
    if let Err(e) = reset.enter_normal_mode() {
        log::warn!("Board reset to normal mode failed: {}", e);
        emit_log(on_event, format!("Board reset failed: {}", e));
    }

    Ok(ProgramReport {
        firmware: path,
        blocks_written: total,
        elapsed,
    })
}

//! Commands for DFU (Device Firmware Update) operations.
//!
//! The engine blocks on USB, so every run goes to a blocking worker while
//! a forwarding thread hands its events to the caller in order.

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use crate::dfu::{
    erase_device, find_dfu_devices, program_device, CancelToken, DeviceProfile, DfuError,
    DfuEvent, DfuResult, EraseOutcome, FirmwareSource, ProgramReport, StmDfuDevice, UsbTransport,
};
use crate::settings::FlasherSettings;
use crate::traits::SysfsBoardReset;

/// Detect attached bootloaders matching the profile's VID/PID.
pub async fn detect_dfu_devices(profile: DeviceProfile) -> DfuResult<Vec<StmDfuDevice>> {
    tokio::task::spawn_blocking(move || find_dfu_devices(profile.vendor_id, profile.product_id))
        .await
        .map_err(|e| DfuError::Worker(format!("Failed to detect devices: {}", e)))
}

/// Mass erase the attached device.
///
/// # Arguments
/// * `settings` - Target profile, reset node and run bounds
/// * `cancel` - Token the caller may trip at any time
/// * `on_event` - Receives log and progress events in order
pub async fn mass_erase<F>(
    settings: FlasherSettings,
    cancel: CancelToken,
    on_event: F,
) -> DfuResult<EraseOutcome>
where
    F: Fn(DfuEvent) + Send + 'static,
{
    run_with_events(
        move |emit| {
            let options = settings.to_upgrade_options();
            let transport = UsbTransport::new(options.profile.vendor_id, options.profile.product_id);
            let reset = SysfsBoardReset::new(settings.reset_node);
            erase_device(transport, &reset, &options, &cancel, emit)
        },
        on_event,
    )
    .await
}

/// Program a `.dfu` file into the attached device.
///
/// # Arguments
/// * `settings` - Target profile, reset node and run bounds
/// * `firmware_path` - File to write; `None` picks the first `.dfu` in the downloads directory
/// * `cancel` - Token the caller may trip at any time
/// * `on_event` - Receives log and progress events in order
pub async fn program_firmware<F>(
    settings: FlasherSettings,
    firmware_path: Option<PathBuf>,
    cancel: CancelToken,
    on_event: F,
) -> DfuResult<ProgramReport>
where
    F: Fn(DfuEvent) + Send + 'static,
{
    let source = firmware_source(&settings, firmware_path);
    run_with_events(
        move |emit| {
            let options = settings.to_upgrade_options();
            let transport = UsbTransport::new(options.profile.vendor_id, options.profile.product_id);
            let reset = SysfsBoardReset::new(settings.reset_node);
            program_device(transport, &reset, &source, &options, &cancel, emit)
        },
        on_event,
    )
    .await
}

fn firmware_source(settings: &FlasherSettings, firmware_path: Option<PathBuf>) -> FirmwareSource {
    match firmware_path {
        Some(path) => FirmwareSource::File(path),
        None => FirmwareSource::Discover(settings.resolved_downloads_dir()),
    }
}

/// Run `work` on a blocking worker, forwarding its events to `on_event`.
async fn run_with_events<R, W, F>(work: W, on_event: F) -> DfuResult<R>
where
    R: Send + 'static,
    W: FnOnce(&dyn Fn(DfuEvent)) -> DfuResult<R> + Send + 'static,
    F: Fn(DfuEvent) + Send + 'static,
{
    // Create a channel for events from the blocking thread
    let (tx, rx) = mpsc::channel::<DfuEvent>();

    let forwarder = thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            on_event(event);
        }
    });

    let result = tokio::task::spawn_blocking(move || {
        work(&|event: DfuEvent| {
            let _ = tx.send(event);
        })
    })
    .await
    .map_err(|e| DfuError::Worker(format!("DFU task panicked: {}", e)));

    // The sender is gone once the worker returns, so this drains and ends
    let _ = forwarder.join();

    result?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collector() -> (Arc<Mutex<Vec<DfuEvent>>>, impl Fn(DfuEvent) + Send + 'static) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |event| sink.lock().unwrap().push(event))
    }

    fn log(message: &str) -> DfuEvent {
        DfuEvent::Log {
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_run_with_events_forwards_in_order() {
        let (events, on_event) = collector();

        let result = run_with_events(
            |emit| {
                emit(log("first"));
                emit(DfuEvent::Progress { percent: 50 });
                emit(log("last"));
                Ok(7)
            },
            on_event,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(
            *events.lock().unwrap(),
            vec![log("first"), DfuEvent::Progress { percent: 50 }, log("last")]
        );
    }

    #[tokio::test]
    async fn test_run_with_events_returns_engine_error() {
        let (events, on_event) = collector();

        let result: DfuResult<()> = run_with_events(
            |emit| {
                emit(log("Mass erase failed: Operation cancelled by user"));
                Err(DfuError::Cancelled)
            },
            on_event,
        )
        .await;

        assert!(matches!(result, Err(DfuError::Cancelled)));
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_with_events_reports_panicked_worker() {
        let (_events, on_event) = collector();

        let result: DfuResult<()> = run_with_events(|_emit| panic!("usb stack gone"), on_event).await;

        match result {
            Err(DfuError::Worker(message)) => assert!(message.starts_with("DFU task panicked")),
            other => panic!("expected worker error, got {:?}", other),
        }
    }

    #[test]
    fn test_firmware_source_explicit_path() {
        let settings = FlasherSettings::default();
        let source = firmware_source(&settings, Some(PathBuf::from("/tmp/app.dfu")));
        assert_eq!(source, FirmwareSource::File(PathBuf::from("/tmp/app.dfu")));
    }

    #[test]
    fn test_firmware_source_discovers_in_downloads_dir() {
        let settings = FlasherSettings {
            downloads_dir: Some(PathBuf::from("/srv/firmware")),
            ..FlasherSettings::default()
        };
        let source = firmware_source(&settings, None);
        assert_eq!(source, FirmwareSource::Discover(PathBuf::from("/srv/firmware")));
    }
}

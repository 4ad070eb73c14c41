mod commands;
mod dfu;
mod settings;
mod traits;

#[cfg(test)]
mod test_helpers;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::dfu::{detect_dfu_devices, mass_erase, program_firmware};
use commands::firmware::{pack_firmware, validate_firmware_package, FirmwareInfo, PackRequest};
use commands::settings::{default_config_dir, get_settings, save_settings};
use dfu::{CancelToken, DfuError, DfuEvent, EraseOutcome};
use settings::FlasherSettings;

/// Flash STM32 parts through their DfuSe USB bootloader.
#[derive(Debug, Parser)]
#[command(name = "stm32-dfuse-flasher", version)]
struct Cli {
    /// Directory holding flasher_settings.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List attached bootloaders matching the configured VID/PID
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mass erase the device, or remove read protection
    Erase,
    /// Program a .dfu file (first .dfu in the downloads directory if omitted)
    Program { file: Option<PathBuf> },
    /// Validate a .dfu file and print its metadata
    Info {
        file: PathBuf,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Wrap a raw binary into a .dfu file
    Pack {
        input: PathBuf,
        output: PathBuf,
        /// Flash address, e.g. 0x08000000 (defaults to the flash base)
        #[arg(long, value_parser = parse_hex_u32)]
        address: Option<u32>,
        #[arg(long, default_value = "ST...")]
        name: String,
        /// bcdDevice written to the suffix
        #[arg(long, value_parser = parse_hex_u16, default_value = "0x2200")]
        bootloader_version: u16,
    },
    /// Show the settings, or write them out for editing
    Config {
        /// Write the current settings to the settings file
        #[arg(long)]
        init: bool,
    },
}

fn parse_hex_u32(value: &str) -> Result<u32, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{}': {}", value, e))
}

fn parse_hex_u16(value: &str) -> Result<u16, String> {
    let wide = parse_hex_u32(value)?;
    u16::try_from(wide).map_err(|_| format!("'{}' does not fit in 16 bits", value))
}

/// Prints engine events with a local timestamp.
fn print_event(event: DfuEvent) {
    let now = chrono::Local::now().format("%H:%M:%S%.3f");
    match event {
        DfuEvent::Log { message } => println!("[{}] {}", now, message),
        DfuEvent::Progress { percent } => println!("[{}] Progress: {}%", now, percent),
    }
}

fn print_firmware_info(info: &FirmwareInfo) {
    println!("File:               {}", info.path);
    println!("Size:               {} bytes", info.file_size);
    println!("Target name:        {}", info.target_name);
    println!("Start address:      0x{:08X}", info.start_address);
    println!("Element length:     {} bytes", info.element_length);
    println!("VID:PID:            {:04X}:{:04X}", info.vendor_id, info.product_id);
    println!("Bootloader version: 0x{:04X}", info.bootloader_version);
    println!("SHA-256:            {}", info.sha256);
}

/// Trip the token on Ctrl-C so a running transfer stops at its next wait.
fn cancel_on_ctrl_c(cancel: &CancelToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}

async fn run(command: Command, settings: FlasherSettings) -> Result<(), DfuError> {
    match command {
        Command::List { json } => {
            let devices = detect_dfu_devices(settings.device.clone()).await?;
            if devices.is_empty() {
                return Err(DfuError::NoDeviceFound);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
                return Ok(());
            }
            for device in devices {
                println!("{}", device.display_label());
                if let Some(serial) = &device.serial_number {
                    println!("    serial {}", serial);
                }
            }
        }
        Command::Erase => {
            let cancel = CancelToken::new();
            cancel_on_ctrl_c(&cancel);
            match mass_erase(settings, cancel, print_event).await? {
                EraseOutcome::Erased => println!("Device erased"),
                EraseOutcome::ProtectionRemoved => {
                    println!("Read protection removed; run erase again once the device is back")
                }
            }
        }
        Command::Program { file } => {
            let cancel = CancelToken::new();
            cancel_on_ctrl_c(&cancel);
            let report = program_firmware(settings, file, cancel, print_event).await?;
            println!(
                "Wrote {} blocks from {} in {} ms",
                report.blocks_written,
                report.firmware.display(),
                report.elapsed.as_millis()
            );
        }
        Command::Info { file, json } => {
            let info = validate_firmware_package(file).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                print_firmware_info(&info);
            }
        }
        Command::Pack {
            input,
            output,
            address,
            name,
            bootloader_version,
        } => {
            let info = pack_firmware(PackRequest {
                input,
                output,
                target_name: name,
                address,
                bootloader_version,
                profile: settings.device,
            })
            .await?;
            print_firmware_info(&info);
        }
        // Handled before the run starts
        Command::Config { .. } => {}
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir.map(Ok).unwrap_or_else(default_config_dir) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let settings = match get_settings(&config_dir) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Command::Config { init } = cli.command {
        if init {
            match save_settings(&config_dir, &settings) {
                Ok(path) => println!("Settings written to {}", path.display()),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    match run(cli.command, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.error_code(), e);
            ExitCode::FAILURE
        }
    }
}

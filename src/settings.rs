//! Flasher settings with JSON persistence.
//!
//! This module provides:
//! - `FlasherSettings` for the target profile, board reset node and run bounds
//! - Persistence to a JSON file in the config directory
//! - Conversion into the options a DFU run takes

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dfu::{DeviceProfile, PollLimits, UpgradeOptions};
use crate::traits::DEFAULT_RESET_NODE;

/// Persisted flasher configuration.
///
/// Every field has a default, so a partial file still loads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FlasherSettings {
    /// Identity and flash geometry of the target.
    pub device: DeviceProfile,

    /// Control file of the board reset driver.
    pub reset_node: PathBuf,

    /// Where `program` looks for a `.dfu` file when none is given.
    /// Falls back to `$HOME/Download`.
    pub downloads_dir: Option<PathBuf>,

    pub settle_delay_ms: u64,

    /// Status reads allowed while waiting for dfuIDLE.
    pub idle_poll_limit: u32,

    /// Ceiling on mass-erase polling.
    pub erase_timeout_ms: u64,
}

impl Default for FlasherSettings {
    fn default() -> Self {
        let limits = PollLimits::default();
        Self {
            device: DeviceProfile::default(),
            reset_node: PathBuf::from(DEFAULT_RESET_NODE),
            downloads_dir: None,
            settle_delay_ms: UpgradeOptions::default().settle_delay.as_millis() as u64,
            idle_poll_limit: limits.idle_poll_limit,
            erase_timeout_ms: limits.erase_timeout.as_millis() as u64,
        }
    }
}

impl FlasherSettings {
    /// Options for an Erase or Program run.
    pub fn to_upgrade_options(&self) -> UpgradeOptions {
        UpgradeOptions {
            profile: self.device.clone(),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            limits: PollLimits {
                idle_poll_limit: self.idle_poll_limit,
                erase_timeout: Duration::from_millis(self.erase_timeout_ms),
            },
        }
    }

    /// Directory searched for firmware when no file is given.
    pub fn resolved_downloads_dir(&self) -> PathBuf {
        match &self.downloads_dir {
            Some(dir) => dir.clone(),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_default()
                .join("Download"),
        }
    }

    /// Check if these settings differ from defaults.
    pub fn has_non_default_settings(&self) -> bool {
        *self != Self::default()
    }
}

/// Settings file name stored in the config directory.
const SETTINGS_FILENAME: &str = "flasher_settings.json";

/// Manages persistence of flasher settings to a JSON file.
pub struct SettingsManager {
    settings_file_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager for the given config directory.
    pub fn new(config_dir: &Path) -> Self {
        let settings_file_path = config_dir.join(SETTINGS_FILENAME);
        Self { settings_file_path }
    }

    /// Load settings from disk, returning defaults if file doesn't exist.
    pub fn load(&self) -> Result<FlasherSettings, String> {
        if !self.settings_file_path.exists() {
            return Ok(FlasherSettings::default());
        }

        let contents = fs::read_to_string(&self.settings_file_path)
            .map_err(|e| format!("Failed to read settings file: {}", e))?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(FlasherSettings::default());
        }

        serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse settings JSON: {}", e))
    }

    /// Save settings to disk.
    pub fn save(&self, settings: &FlasherSettings) -> Result<(), String> {
        if let Some(parent) = self.settings_file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {}", e))?;
        }

        let contents = serde_json::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(&self.settings_file_path, contents)
            .map_err(|e| format!("Failed to write settings file: {}", e))?;

        Ok(())
    }

    /// Get the path where settings are stored.
    pub fn settings_path(&self) -> &Path {
        &self.settings_file_path
    }
}

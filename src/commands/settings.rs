//! Commands for flasher settings management.
//!
//! Settings live in a JSON file under the user's config directory.

use std::path::{Path, PathBuf};

use crate::settings::{FlasherSettings, SettingsManager};

/// Directory name under `$XDG_CONFIG_HOME` (or `$HOME/.config`).
const CONFIG_DIR_NAME: &str = "stm32-dfuse-flasher";

/// Default location of the settings directory.
pub fn default_config_dir() -> Result<PathBuf, String> {
    if let Some(base) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(base).join(CONFIG_DIR_NAME));
    }
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".config").join(CONFIG_DIR_NAME))
        .ok_or_else(|| "Failed to get config directory: HOME is not set".to_string())
}

/// Get current settings from disk.
///
/// Returns default settings if no settings file exists yet.
pub fn get_settings(config_dir: &Path) -> Result<FlasherSettings, String> {
    SettingsManager::new(config_dir).load()
}

/// Save settings to disk and return the file they went to.
pub fn save_settings(config_dir: &Path, settings: &FlasherSettings) -> Result<PathBuf, String> {
    let manager = SettingsManager::new(config_dir);
    manager.save(settings)?;

    if settings.has_non_default_settings() {
        log::debug!("Saved non-default settings: {:?}", settings);
    }

    Ok(manager.settings_path().to_path_buf())
}

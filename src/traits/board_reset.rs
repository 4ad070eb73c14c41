use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

#[cfg(test)]
use mockall::automock;

/// Default sysfs node driving the STM32 BOOT0/RESET lines.
pub const DEFAULT_RESET_NODE: &str = "/sys/class/gpio-boot-reset/stm32f042c4/mode";

/// Abstraction over the board's boot-mode/reset lines.
/// This allows mocking the hardware toggle in tests.
#[cfg_attr(test, automock)]
pub trait BoardReset: Send + Sync {
    /// Reset the MCU into its system DFU bootloader
    fn enter_dfu_mode(&self) -> io::Result<()>;

    /// Reset the MCU into the application
    fn enter_normal_mode(&self) -> io::Result<()>;
}

/// Writes "prog" or "normal" to a board-support file node.
#[derive(Debug, Clone)]
pub struct SysfsBoardReset {
    node: PathBuf,
}

impl SysfsBoardReset {
    pub fn new(node: impl Into<PathBuf>) -> Self {
        Self { node: node.into() }
    }

    fn write_mode(&self, mode: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.node)?;
        file.write_all(mode.as_bytes())?;
        log::debug!("Wrote '{}' to {}", mode, self.node.display());
        Ok(())
    }
}

impl Default for SysfsBoardReset {
    fn default() -> Self {
        Self::new(DEFAULT_RESET_NODE)
    }
}

impl BoardReset for SysfsBoardReset {
    fn enter_dfu_mode(&self) -> io::Result<()> {
        self.write_mode("prog")
    }

    fn enter_normal_mode(&self) -> io::Result<()> {
        self.write_mode("normal")
    }
}

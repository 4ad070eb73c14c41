//! Scratch directories for firmware files, settings and reset nodes.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Relative location of the board reset node inside a context.
const RESET_NODE: &str = "sys/class/gpio-boot-reset/stm32f042c4/mode";

/// A temporary tree, removed when dropped.
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Absolute path of `relative`, whether or not it exists.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    /// Write raw bytes, creating parent directories.
    pub fn write_bytes(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    pub fn write_text(&self, relative: &str, content: &str) -> PathBuf {
        self.write_bytes(relative, content.as_bytes())
    }

    pub fn make_dir(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(&path).expect("Failed to create dir");
        path
    }

    /// Reset node in its power-on state ("normal").
    pub fn create_reset_node(&self) -> PathBuf {
        self.write_text(RESET_NODE, "normal")
    }

    pub fn read_file(&self, relative: &str) -> String {
        fs::read_to_string(self.path(relative)).expect("Failed to read file")
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

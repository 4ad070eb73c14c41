//! Command layer between the CLI and the blocking DFU engine.

pub mod dfu;
pub mod firmware;
pub mod settings;

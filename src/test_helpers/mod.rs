//! Shared fixtures for unit tests.

mod fake_device;
mod fixtures;
mod temp;

pub use fake_device::{FakeDfuDevice, FakeRequest};
pub use fixtures::{reseal, DfuFileBuilder};
pub use temp::TestContext;

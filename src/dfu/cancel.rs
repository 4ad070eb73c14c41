//! Cooperative cancellation for long-running DFU operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::CANCEL_CHECK_INTERVAL;
use super::error::{DfuError, DfuResult};

/// Shared flag checked between USB transactions and during sleeps.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` once cancellation was requested.
    pub fn check(&self) -> DfuResult<()> {
        if self.is_cancelled() {
            Err(DfuError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early if cancelled.
    pub fn sleep(&self, duration: Duration) -> DfuResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(CANCEL_CHECK_INTERVAL));
        }
    }
}

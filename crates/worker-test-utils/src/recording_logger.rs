//! Logging reconfiguration double.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use worker_agent::observability::{LogReconfigure, LoggingError};

/// Counts reconfiguration requests instead of touching the global
/// subscriber.
#[derive(Default)]
pub struct RecordingLogger {
    reconfigurations: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingLogger {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A logger whose reconfiguration always fails.
    #[must_use]
    pub fn failing() -> Arc<Self> {
        let logger = Self::default();
        logger.fail.store(true, Ordering::SeqCst);
        Arc::new(logger)
    }

    /// Reconfiguration attempts, successful or not.
    #[must_use]
    pub fn reconfigurations(&self) -> usize {
        self.reconfigurations.load(Ordering::SeqCst)
    }
}

impl LogReconfigure for RecordingLogger {
    fn reconfigure(&self) -> Result<(), LoggingError> {
        self.reconfigurations.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(LoggingError::Reload("subscriber gone".to_string()));
        }
        Ok(())
    }
}

//! Mock process-variable writer for testing
//!
//! Provides a simulated control network so sequencing can be tested without
//! hardware. It provides:
//! - Simulated write latency
//! - Controllable failure injection (next write, or every write to a PV)
//! - Call logging for test verification

use super::{PvValue, PvWriter};
use crate::error::WriteError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One recorded write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCall {
    /// Process variable name
    pub pv: String,
    /// Value written
    pub value: PvValue,
    /// Timeout the caller asked for
    pub timeout: Duration,
}

/// Mock writer for testing
///
/// Clones share state, so a test can keep one handle and give another to the
/// orchestrator.
///
/// # Example
///
/// ```
/// use vacs_uhv::adapters::MockPvWriter;
///
/// let writer = MockPvWriter::new();
/// writer.fail_pv("PumpB-C1:VoltageTarget-SP");
/// assert!(writer.calls().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MockPvWriter {
    latency: Arc<Mutex<Duration>>,
    should_fail_next: Arc<AtomicBool>,
    failing_pvs: Arc<Mutex<HashSet<String>>>,
    call_log: Arc<Mutex<Vec<WriteCall>>>,
}

// A poisoned lock only means another test thread panicked mid-write; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockPvWriter {
    /// Create a new mock writer with no latency
    pub fn new() -> Self {
        Self::default()
    }

    /// Set simulated latency per write
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.latency) = latency;
        self
    }

    /// Inject a failure for the next write
    pub fn inject_next_failure(&self) {
        self.should_fail_next.store(true, Ordering::SeqCst);
    }

    /// Make every write to `pv` fail
    pub fn fail_pv(&self, pv: impl Into<String>) {
        lock(&self.failing_pvs).insert(pv.into());
    }

    /// Get the call log
    pub fn calls(&self) -> Vec<WriteCall> {
        lock(&self.call_log).clone()
    }

    /// Calls whose PV name ends with `suffix`
    pub fn calls_ending_with(&self, suffix: &str) -> Vec<WriteCall> {
        lock(&self.call_log)
            .iter()
            .filter(|call| call.pv.ends_with(suffix))
            .cloned()
            .collect()
    }

    /// Clear the call log
    pub fn clear_log(&self) {
        lock(&self.call_log).clear();
    }

    fn check_failure(&self, pv: &str) -> bool {
        self.should_fail_next.swap(false, Ordering::SeqCst) || lock(&self.failing_pvs).contains(pv)
    }
}

#[async_trait]
impl PvWriter for MockPvWriter {
    async fn write(&self, pv: &str, value: PvValue, timeout: Duration) -> Result<(), WriteError> {
        let latency = *lock(&self.latency);
        if latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(WriteError::Timeout(timeout));
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        lock(&self.call_log).push(WriteCall {
            pv: pv.to_string(),
            value,
            timeout,
        });

        if self.check_failure(pv) {
            return Err(WriteError::Rejected("Injected failure".to_string()));
        }
        Ok(())
    }
}

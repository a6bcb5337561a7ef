//! Process-variable writer adapters
//!
//! The sequencing core only ever issues single named-value writes. This module
//! defines that seam ([`PvWriter`]) and its implementations:
//!
//! - [`CaputWriter`]: writes through the EPICS `caput` command-line tool
//! - [`DryRunWriter`]: logs every write, touches nothing
//! - [`MockPvWriter`]: records calls, injects failures and latency (tests)

use crate::config::{WriterBackend, WriterConfig};
use crate::error::WriteError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod caput_adapter;
pub mod dry_run;
pub mod mock_adapter;

pub use caput_adapter::CaputWriter;
pub use dry_run::DryRunWriter;
pub use mock_adapter::{MockPvWriter, WriteCall};

/// Value written to a process variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum PvValue {
    /// Integer setpoint (mode selector, voltage)
    Int(i64),
    /// Floating-point setpoint (alarm thresholds)
    Float(f64),
}

impl fmt::Display for PvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PvValue::Int(v) => write!(f, "{}", v),
            PvValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for PvValue {
    fn from(value: i64) -> Self {
        PvValue::Int(value)
    }
}

impl From<f64> for PvValue {
    fn from(value: f64) -> Self {
        PvValue::Float(value)
    }
}

/// Generic async writer for named process variables.
///
/// Implementations must bound every write by `timeout`; a write that does not
/// complete in time is a [`WriteError::Timeout`].
#[async_trait]
pub trait PvWriter: Send + Sync {
    /// Write `value` to the process variable `pv`.
    async fn write(&self, pv: &str, value: PvValue, timeout: Duration) -> Result<(), WriteError>;
}

/// Build the writer selected by configuration.
pub fn writer_from_config(config: &WriterConfig) -> Arc<dyn PvWriter> {
    match config.backend {
        WriterBackend::DryRun => Arc::new(DryRunWriter::new()),
        WriterBackend::Caput => Arc::new(CaputWriter::new(config.caput_path.clone())),
    }
}

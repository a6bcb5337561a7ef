//! Custom error types for the pump utilities.
//!
//! This module defines the primary error type, `PumpError`, shared by the library and
//! both binaries. Using the `thiserror` crate, it separates the three classes of failure
//! a sequencing run can meet:
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: malformed run parameters (voltage out of range, negative delay).
//!   Raised before any device task starts and fatal to the whole run.
//! - **`WriteFailure`**: a single process-variable write failed or timed out. It is scoped
//!   to one device's sequencer: that device ends in `Failed`, its siblings keep going.
//! - **`Cancelled`**: the run's cancellation token fired while a device was suspended.
//! - **`Directory`** and **`Unexpected`**: anything else (inventory fetch failure,
//!   malformed device descriptor, a panicked device task). Fatal to the whole run.
//! - **`Config`** / **`Io`**: wrapped lower-level errors, also fatal.
//!
//! Writer backends report the narrower [`WriteError`]; the transition primitives lift it
//! into `WriteFailure` together with the device prefix and the PV name.

use crate::config::ConfigError;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, PumpError>;

#[derive(Error, Debug)]
pub enum PumpError {
    #[error("Invalid run parameters: {0}")]
    Validation(String),

    #[error("Write to '{pv}' failed for device '{device}': {reason}")]
    WriteFailure {
        device: String,
        pv: String,
        reason: String,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Device directory error: {0}")]
    Directory(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PumpError {
    /// Whether this error aborts an entire run rather than a single device.
    pub fn is_fatal_to_run(&self) -> bool {
        !matches!(self, PumpError::WriteFailure { .. } | PumpError::Cancelled)
    }
}

/// Failure of one write reported by a [`crate::adapters::PvWriter`] backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = PumpError::WriteFailure {
            device: "UHV-01".to_string(),
            pv: "UHV-01:Step-SP_Backend".to_string(),
            reason: WriteError::Timeout(Duration::from_secs(1)).to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Write to 'UHV-01:Step-SP_Backend' failed for device 'UHV-01': timed out after 1s"
        );
    }

    #[test]
    fn test_fatality_classes() {
        assert!(PumpError::Validation("voltage".into()).is_fatal_to_run());
        assert!(PumpError::Unexpected("panic".into()).is_fatal_to_run());
        assert!(PumpError::Directory("404".into()).is_fatal_to_run());
        assert!(!PumpError::Cancelled.is_fatal_to_run());
        assert!(!PumpError::WriteFailure {
            device: "d".into(),
            pv: "p".into(),
            reason: "r".into(),
        }
        .is_fatal_to_run());
    }
}

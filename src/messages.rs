//! Run parameters and the events a run emits.
//!
//! Events are plain owned values sent one message at a time over a
//! `tokio::sync::broadcast` channel, so a subscriber always sees a whole
//! [`ProgressEvent`] even when many device tasks emit at once.

use crate::error::{AppResult, PumpError};
use crate::orchestrator::RunReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Lowest accepted FIXED-mode channel voltage.
pub const VOLTAGE_MIN: i64 = 3000;
/// Highest accepted FIXED-mode channel voltage.
pub const VOLTAGE_MAX: i64 = 7000;

/// Which transition(s) a run drives each device through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    /// Constant target voltage on every channel
    #[value(name = "fixed")]
    Fixed,
    /// Stepped voltage, no channel writes
    #[value(name = "step")]
    Step,
    /// STEP now, FIXED after the configured delay
    #[value(name = "step_to_fixed")]
    StepToFixed,
}

impl fmt::Display for TransitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionMode::Fixed => "fixed",
            TransitionMode::Step => "step",
            TransitionMode::StepToFixed => "step_to_fixed",
        };
        f.write_str(name)
    }
}

/// Voltage and delay shared by every device of a run. Only constructible validated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransitionParameters {
    voltage: i64,
    delay: Duration,
}

impl TransitionParameters {
    /// Validate and build run parameters.
    ///
    /// # Errors
    ///
    /// `PumpError::Validation` when the voltage is outside
    /// [`VOLTAGE_MIN`]..=[`VOLTAGE_MAX`] or the delay is negative or not finite.
    pub fn new(voltage: i64, delay_secs: f64) -> AppResult<Self> {
        if !(VOLTAGE_MIN..=VOLTAGE_MAX).contains(&voltage) {
            return Err(PumpError::Validation(format!(
                "voltage must be between {} and {}, got {}",
                VOLTAGE_MIN, VOLTAGE_MAX, voltage
            )));
        }
        if !delay_secs.is_finite() {
            return Err(PumpError::Validation(format!(
                "step-to-fixed delay must be a finite number of seconds, got {}",
                delay_secs
            )));
        }
        if delay_secs < 0.0 {
            return Err(PumpError::Validation(format!(
                "step-to-fixed delay cannot be less than zero, got {}",
                delay_secs
            )));
        }
        let delay = Duration::try_from_secs_f64(delay_secs).map_err(|e| {
            PumpError::Validation(format!(
                "step-to-fixed delay of {} seconds is out of range: {}",
                delay_secs, e
            ))
        })?;
        Ok(Self { voltage, delay })
    }

    /// Target channel voltage for FIXED mode.
    pub fn voltage(&self) -> i64 {
        self.voltage
    }

    /// Time spent in STEP before switching to FIXED.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// Status carried by a [`ProgressEvent`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProgressStatus {
    /// Entering STEP mode
    ToStep,
    /// Waiting; time left before the FIXED transition
    Remaining(Duration),
    /// Entering FIXED mode
    ToFixed,
    /// Sequence completed
    Done,
    /// Sequence aborted by a write failure
    Failed(String),
    /// Sequence stopped by run cancellation
    Cancelled,
}

impl ProgressStatus {
    /// Whether this status ends the device's sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressStatus::Done | ProgressStatus::Failed(_) | ProgressStatus::Cancelled
        )
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressStatus::ToStep => f.write_str("to Step"),
            ProgressStatus::ToFixed => f.write_str("to Fixed"),
            ProgressStatus::Done => f.write_str("Done"),
            ProgressStatus::Cancelled => f.write_str("Cancelled"),
            ProgressStatus::Failed(reason) => write!(f, "Failed: {}", reason),
            ProgressStatus::Remaining(left) => f.write_str(&format_remaining(*left)),
        }
    }
}

/// `H:MM:SS` rendering of a remaining time, rounded up to the second.
pub fn format_remaining(left: Duration) -> String {
    let mut secs = left.as_secs();
    if left.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// One progress update from one device's sequencer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Prefix of the device that produced the event
    pub device_prefix: String,
    /// What happened
    pub status: ProgressStatus,
}

impl ProgressEvent {
    /// Build an event for `device_prefix`.
    pub fn new(device_prefix: impl Into<String>, status: ProgressStatus) -> Self {
        Self {
            device_prefix: device_prefix.into(),
            status,
        }
    }
}

/// Everything a run broadcasts to its subscribers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Emitted before any device task is launched.
    Started {
        /// Run identifier
        run_id: Uuid,
        /// Devices taking part, in launch order
        devices: Vec<String>,
    },
    /// A device reported progress.
    Progress {
        /// Run the device belongs to
        run_id: Uuid,
        /// What the device reported
        event: ProgressEvent,
    },
    /// Emitted after every device reached a terminal state.
    Finished {
        /// Run identifier
        run_id: Uuid,
        /// Per-device outcomes
        report: RunReport,
    },
    /// A device task died outside the sequencer; the rest were aborted.
    Aborted {
        /// Run identifier
        run_id: Uuid,
        /// What went wrong
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_bounds() {
        assert!(TransitionParameters::new(3000, 0.0).is_ok());
        assert!(TransitionParameters::new(7000, 600.0).is_ok());
        assert!(matches!(
            TransitionParameters::new(2999, 600.0),
            Err(PumpError::Validation(_))
        ));
        assert!(matches!(
            TransitionParameters::new(7001, 600.0),
            Err(PumpError::Validation(_))
        ));
        assert!(matches!(
            TransitionParameters::new(5000, -1.0),
            Err(PumpError::Validation(_))
        ));
        assert!(TransitionParameters::new(5000, f64::NAN).is_err());
        assert!(TransitionParameters::new(5000, f64::INFINITY).is_err());
        assert!(matches!(
            TransitionParameters::new(5000, 1e20),
            Err(PumpError::Validation(_))
        ));
    }

    #[test]
    fn test_parameters_keep_values() {
        let params = TransitionParameters::new(5000, 2.5).unwrap();
        assert_eq!(params.voltage(), 5000);
        assert_eq!(params.delay(), Duration::from_millis(2500));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ProgressStatus::ToStep.to_string(), "to Step");
        assert_eq!(ProgressStatus::ToFixed.to_string(), "to Fixed");
        assert_eq!(ProgressStatus::Done.to_string(), "Done");
        assert_eq!(
            ProgressStatus::Remaining(Duration::from_secs(594)).to_string(),
            "0:09:54"
        );
        assert_eq!(
            ProgressStatus::Remaining(Duration::from_millis(3_600_500)).to_string(),
            "1:00:01"
        );
        assert!(ProgressStatus::Failed("timeout".into())
            .to_string()
            .starts_with("Failed"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ProgressStatus::Done.is_terminal());
        assert!(ProgressStatus::Cancelled.is_terminal());
        assert!(ProgressStatus::Failed(String::new()).is_terminal());
        assert!(!ProgressStatus::ToStep.is_terminal());
        assert!(!ProgressStatus::Remaining(Duration::ZERO).is_terminal());
    }
}

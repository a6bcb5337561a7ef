//! Pressure alarm thresholds for vacuum gauges.
//!
//! Each gauge PV carries two EPICS alarm fields: `.HIGH` (minor) and `.HIHI`
//! (major). Thresholds are written one PV at a time; a failed write is
//! reported and the rest still go out.

use crate::adapters::{PvValue, PvWriter};
use crate::error::{AppResult, PumpError, WriteError};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Minor and major pressure alarm limits, in mbar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlarmThresholds {
    high: f64,
    hihi: f64,
}

impl AlarmThresholds {
    /// Booster, transport lines and test stands.
    pub const BOOSTER: AlarmThresholds = AlarmThresholds {
        high: 1e-8,
        hihi: 1e-7,
    };

    /// Storage ring.
    pub const STORAGE_RING: AlarmThresholds = AlarmThresholds {
        high: 1e-9,
        hihi: 1e-8,
    };

    /// Validated thresholds.
    ///
    /// # Errors
    ///
    /// `PumpError::Validation` unless both limits are finite and positive with
    /// `high <= hihi`.
    pub fn new(high: f64, hihi: f64) -> AppResult<Self> {
        if !(high.is_finite() && hihi.is_finite()) || high <= 0.0 || hihi <= 0.0 {
            return Err(PumpError::Validation(format!(
                "alarm thresholds must be positive, got HIGH={} HIHI={}",
                high, hihi
            )));
        }
        if high > hihi {
            return Err(PumpError::Validation(format!(
                "HIGH ({}) must not exceed HIHI ({})",
                high, hihi
            )));
        }
        Ok(Self { high, hihi })
    }

    /// Minor alarm limit
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Major alarm limit
    pub fn hihi(&self) -> f64 {
        self.hihi
    }
}

/// Result of one alarm field write.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmWrite {
    /// Field written, e.g. `BO-01U:VA-CCG-BG:Pressure-Mon.HIGH`
    pub pv: String,
    /// Value sent
    pub value: f64,
    /// Outcome
    pub result: Result<(), WriteError>,
}

/// Gauge PVs from a list file: one per line, blank lines and `#` comments skipped.
pub fn parse_pv_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Write `.HIGH` then `.HIHI` for every PV in `pvs`, in order.
pub async fn apply_alarms(
    writer: &dyn PvWriter,
    pvs: &[String],
    thresholds: AlarmThresholds,
    timeout: Duration,
) -> Vec<AlarmWrite> {
    let mut writes = Vec::with_capacity(pvs.len() * 2);
    for pv in pvs {
        for (field, value) in [("HIGH", thresholds.high), ("HIHI", thresholds.hihi)] {
            let target = format!("{}.{}", pv, field);
            info!("set {} {}", target, value);
            let result = writer.write(&target, PvValue::Float(value), timeout).await;
            if let Err(e) = &result {
                warn!(pv = %target, error = %e, "alarm write failed");
            }
            writes.push(AlarmWrite {
                pv: target,
                value,
                result,
            });
        }
    }
    writes
}

//! STEP and FIXED transition primitives.
//!
//! Each primitive is a short, strictly ordered series of writes, every one followed
//! by the configured settle time. Nothing is retried and nothing is rolled back: if
//! the third channel of a FIXED transition fails, the first two keep their new
//! voltage.

use crate::adapters::{PvValue, PvWriter};
use crate::config::TimingConfig;
use crate::device::{voltage_target_pv, DeviceDescriptor};
use crate::error::{AppResult, PumpError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// `Step-SP_Backend` value selecting stepped voltage.
pub const STEP_MODE_VALUE: i64 = 15;
/// `Step-SP_Backend` value selecting fixed voltage.
pub const FIXED_MODE_VALUE: i64 = 0;

/// Writes that move one controller between STEP and FIXED.
#[derive(Clone)]
pub struct TransitionPrimitives {
    writer: Arc<dyn PvWriter>,
    timing: TimingConfig,
    cancel: CancellationToken,
}

impl TransitionPrimitives {
    /// Primitives writing through `writer`, stopping early once `cancel` fires.
    pub fn new(writer: Arc<dyn PvWriter>, timing: TimingConfig, cancel: CancellationToken) -> Self {
        Self {
            writer,
            timing,
            cancel,
        }
    }

    /// Timing in use.
    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Put the controller in STEP mode.
    pub async fn to_step(&self, device: &DeviceDescriptor) -> AppResult<()> {
        self.write(&device.prefix, &device.mode_pv(), PvValue::Int(STEP_MODE_VALUE))
            .await
    }

    /// Put the controller in FIXED mode and set every channel to `voltage`.
    pub async fn to_fixed(&self, device: &DeviceDescriptor, voltage: i64) -> AppResult<()> {
        self.write(&device.prefix, &device.mode_pv(), PvValue::Int(FIXED_MODE_VALUE))
            .await?;

        for channel in device.channel_prefixes() {
            self.write(&device.prefix, &voltage_target_pv(channel), PvValue::Int(voltage))
                .await?;
        }
        Ok(())
    }

    /// Sleep for `duration` unless the run is cancelled first.
    pub async fn pause(&self, duration: Duration) -> AppResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PumpError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn write(&self, device: &str, pv: &str, value: PvValue) -> AppResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PumpError::Cancelled);
        }

        info!(device, "set {} {}", pv, value);
        self.writer
            .write(pv, value, self.timing.write_timeout())
            .await
            .map_err(|e| PumpError::WriteFailure {
                device: device.to_string(),
                pv: pv.to_string(),
                reason: e.to_string(),
            })?;

        self.pause(self.timing.settle()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockPvWriter;

    fn pump() -> DeviceDescriptor {
        DeviceDescriptor::new("PumpA", [("C1", "PumpA-C1"), ("C2", "PumpA-C2")])
    }

    fn primitives(writer: &MockPvWriter) -> (TransitionPrimitives, CancellationToken) {
        let cancel = CancellationToken::new();
        (
            TransitionPrimitives::new(
                Arc::new(writer.clone()),
                TimingConfig::default(),
                cancel.clone(),
            ),
            cancel,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_to_step_writes_mode_only() {
        let writer = MockPvWriter::new();
        let (prims, _) = primitives(&writer);

        let start = tokio::time::Instant::now();
        prims.to_step(&pump()).await.unwrap();

        let calls = writer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pv, "PumpA:Step-SP_Backend");
        assert_eq!(calls[0].value, PvValue::Int(15));
        assert_eq!(calls[0].timeout, Duration::from_secs(1));
        // settle time follows the write
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_to_fixed_writes_mode_then_each_channel() {
        let writer = MockPvWriter::new();
        let (prims, _) = primitives(&writer);

        let start = tokio::time::Instant::now();
        prims.to_fixed(&pump(), 5000).await.unwrap();

        let calls: Vec<_> = writer
            .calls()
            .into_iter()
            .map(|c| (c.pv, c.value))
            .collect();
        assert_eq!(
            calls,
            vec![
                ("PumpA:Step-SP_Backend".to_string(), PvValue::Int(0)),
                ("PumpA-C1:VoltageTarget-SP".to_string(), PvValue::Int(5000)),
                ("PumpA-C2:VoltageTarget-SP".to_string(), PvValue::Int(5000)),
            ]
        );
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_failure_keeps_earlier_writes() {
        let writer = MockPvWriter::new();
        writer.fail_pv("PumpA-C2:VoltageTarget-SP");
        let (prims, _) = primitives(&writer);

        let err = prims.to_fixed(&pump(), 4000).await.unwrap_err();
        match err {
            PumpError::WriteFailure { device, pv, .. } => {
                assert_eq!(device, "PumpA");
                assert_eq!(pv, "PumpA-C2:VoltageTarget-SP");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // no rollback, no retry
        assert_eq!(writer.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_primitive_skips_write() {
        let writer = MockPvWriter::new();
        let (prims, cancel) = primitives(&writer);
        cancel.cancel();

        let result = prims.to_step(&pump()).await;
        assert!(matches!(result, Err(PumpError::Cancelled)));
        assert!(writer.calls().is_empty());
    }
}

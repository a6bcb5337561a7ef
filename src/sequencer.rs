//! Delayed transition sequencer: one device, one run.
//!
//! ```text
//! Idle -> ToStep -> Waiting -> ToFixed -> Done
//!    \        \         \          \
//!     +--------+---------+----------+--> Failed | Cancelled
//! ```
//!
//! `Fixed` runs only the `ToFixed` leg, `Step` only the `ToStep` leg, and
//! `StepToFixed` the whole machine. While `Waiting`, the sequencer reports the
//! remaining time once per tick, where a tick is `ceil(delay / tick_divisor)`
//! bounded below by `min_tick_ms`, so even a very long delay produces about
//! `tick_divisor` progress events.

use crate::device::DeviceDescriptor;
use crate::error::{AppResult, PumpError};
use crate::messages::{
    ProgressEvent, ProgressStatus, RunEvent, TransitionMode, TransitionParameters,
};
use crate::transition::TransitionPrimitives;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sequencer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SequencerState {
    /// Not started
    Idle,
    /// Writing STEP mode
    ToStep,
    /// In STEP, counting down the delay
    Waiting,
    /// Writing FIXED mode and channel voltages
    ToFixed,
    /// Completed
    Done,
    /// Stopped by a write failure
    Failed,
    /// Stopped by run cancellation
    Cancelled,
}

impl SequencerState {
    /// Whether the sequencer can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SequencerState::Done | SequencerState::Failed | SequencerState::Cancelled
        )
    }
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SequencerState::Idle => "Idle",
            SequencerState::ToStep => "to Step",
            SequencerState::Waiting => "Waiting",
            SequencerState::ToFixed => "to Fixed",
            SequencerState::Done => "Done",
            SequencerState::Failed => "Failed",
            SequencerState::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Terminal result of one device's sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceOutcome {
    /// Device prefix
    pub device_prefix: String,
    /// Final state (always terminal)
    pub state: SequencerState,
    /// Failure description when `state` is `Failed`
    pub error: Option<String>,
}

/// Fan-in point for progress events; cloned into every device task.
#[derive(Clone)]
pub struct ProgressSink {
    run_id: Uuid,
    tx: broadcast::Sender<RunEvent>,
}

impl ProgressSink {
    /// Sink publishing events of run `run_id` on `tx`.
    pub fn new(run_id: Uuid, tx: broadcast::Sender<RunEvent>) -> Self {
        Self { run_id, tx }
    }

    /// Publish a progress event. Having no subscriber is not an error.
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(RunEvent::Progress {
            run_id: self.run_id,
            event,
        });
    }

    /// Publish a run-level event.
    pub fn publish(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }
}

/// Drives one device through the transitions selected by its run.
pub struct Sequencer {
    device: Arc<DeviceDescriptor>,
    mode: TransitionMode,
    params: TransitionParameters,
    primitives: TransitionPrimitives,
    sink: ProgressSink,
    state: SequencerState,
}

impl Sequencer {
    /// Create an idle sequencer.
    pub fn new(
        device: Arc<DeviceDescriptor>,
        mode: TransitionMode,
        params: TransitionParameters,
        primitives: TransitionPrimitives,
        sink: ProgressSink,
    ) -> Self {
        Self {
            device,
            mode,
            params,
            primitives,
            sink,
            state: SequencerState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Run to a terminal state. Never fails: errors become the `Failed` outcome.
    pub async fn run(mut self) -> DeviceOutcome {
        let result = match self.mode {
            TransitionMode::Fixed => self.fixed_leg().await,
            TransitionMode::Step => self.step_leg().await,
            TransitionMode::StepToFixed => self.step_to_fixed().await,
        };

        let (state, status, error) = match result {
            Ok(()) => (SequencerState::Done, ProgressStatus::Done, None),
            Err(PumpError::Cancelled) => {
                info!(device = %self.device.prefix, "sequence cancelled");
                (SequencerState::Cancelled, ProgressStatus::Cancelled, None)
            }
            Err(e) => {
                warn!(device = %self.device.prefix, state = ?self.state, error = %e, "sequence failed");
                let reason = e.to_string();
                (
                    SequencerState::Failed,
                    ProgressStatus::Failed(reason.clone()),
                    Some(reason),
                )
            }
        };

        self.enter(state);
        self.emit(status);
        DeviceOutcome {
            device_prefix: self.device.prefix.clone(),
            state,
            error,
        }
    }

    async fn step_to_fixed(&mut self) -> AppResult<()> {
        info!(
            device = %self.device.prefix,
            delay_secs = self.params.delay().as_secs_f64(),
            "step to fixed: entering STEP, FIXED after delay"
        );
        self.step_leg().await?;
        self.wait_leg().await?;
        self.fixed_leg().await
    }

    async fn step_leg(&mut self) -> AppResult<()> {
        self.enter(SequencerState::ToStep);
        self.emit(ProgressStatus::ToStep);
        self.primitives.to_step(&self.device).await
    }

    async fn wait_leg(&mut self) -> AppResult<()> {
        self.enter(SequencerState::Waiting);
        let delay = self.params.delay();
        let tick = self.primitives.timing().tick_for(delay);
        let t_start = Instant::now();

        loop {
            let elapsed = t_start.elapsed();
            if elapsed >= delay {
                break;
            }
            let remaining = delay - elapsed;
            info!(device = %self.device.prefix, remaining = ?remaining, "time remaining");
            self.emit(ProgressStatus::Remaining(remaining));
            self.primitives.pause(tick).await?;
        }
        Ok(())
    }

    async fn fixed_leg(&mut self) -> AppResult<()> {
        self.enter(SequencerState::ToFixed);
        self.emit(ProgressStatus::ToFixed);
        self.primitives
            .to_fixed(&self.device, self.params.voltage())
            .await
    }

    fn enter(&mut self, next: SequencerState) {
        debug!(device = %self.device.prefix, from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    fn emit(&self, status: ProgressStatus) {
        self.sink
            .emit(ProgressEvent::new(self.device.prefix.clone(), status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockPvWriter, PvValue};
    use crate::config::TimingConfig;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        writer: MockPvWriter,
        rx: broadcast::Receiver<RunEvent>,
        cancel: CancellationToken,
        sequencer: Sequencer,
    }

    fn harness(mode: TransitionMode, voltage: i64, delay: f64) -> Harness {
        let writer = MockPvWriter::new();
        let (tx, rx) = broadcast::channel(1024);
        let cancel = CancellationToken::new();
        let primitives = TransitionPrimitives::new(
            Arc::new(writer.clone()),
            TimingConfig::default(),
            cancel.clone(),
        );
        let device = Arc::new(DeviceDescriptor::new("PumpA", [("C1", "PumpA-C1")]));
        let params = TransitionParameters::new(voltage, delay).unwrap();
        let sink = ProgressSink::new(Uuid::new_v4(), tx);
        let sequencer = Sequencer::new(device, mode, params, primitives, sink);
        Harness {
            writer,
            rx,
            cancel,
            sequencer,
        }
    }

    fn statuses(rx: &mut broadcast::Receiver<RunEvent>) -> Vec<ProgressStatus> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RunEvent::Progress { event: p, .. } = event {
                assert_eq!(p.device_prefix, "PumpA");
                out.push(p.status);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_to_fixed_sequence() {
        let mut h = harness(TransitionMode::StepToFixed, 5000, 10.0);
        assert_eq!(h.sequencer.state(), SequencerState::Idle);

        let outcome = h.sequencer.run().await;
        assert_eq!(outcome.state, SequencerState::Done);
        assert!(outcome.error.is_none());

        let events = statuses(&mut h.rx);
        assert_eq!(events.first(), Some(&ProgressStatus::ToStep));
        assert_eq!(&events[events.len() - 2..], &[ProgressStatus::ToFixed, ProgressStatus::Done]);

        let remaining: Vec<Duration> = events
            .iter()
            .filter_map(|s| match s {
                ProgressStatus::Remaining(d) => Some(*d),
                _ => None,
            })
            .collect();
        // 10 s delay, 1 s tick
        assert_eq!(remaining.len(), 10);
        assert!(remaining.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(remaining[0], Duration::from_secs(10));

        let voltages = h.writer.calls_ending_with(":VoltageTarget-SP");
        assert_eq!(voltages.len(), 1);
        assert_eq!(voltages[0].value, PvValue::Int(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_delay_is_rate_limited() {
        let mut h = harness(TransitionMode::StepToFixed, 3000, 600.0);
        h.sequencer.run().await;

        let ticks = statuses(&mut h.rx)
            .into_iter()
            .filter(|s| matches!(s, ProgressStatus::Remaining(_)))
            .count();
        // 600 s delay, 6 s tick
        assert_eq!(ticks, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_has_no_ticks() {
        let mut h = harness(TransitionMode::StepToFixed, 3000, 0.0);
        let outcome = h.sequencer.run().await;
        assert_eq!(outcome.state, SequencerState::Done);
        assert_eq!(
            statuses(&mut h.rx),
            vec![ProgressStatus::ToStep, ProgressStatus::ToFixed, ProgressStatus::Done]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_mode_never_writes_voltage() {
        let mut h = harness(TransitionMode::Step, 3000, 600.0);
        let start = Instant::now();
        h.sequencer.run().await;

        assert_eq!(
            statuses(&mut h.rx),
            vec![ProgressStatus::ToStep, ProgressStatus::Done]
        );
        assert!(h.writer.calls_ending_with(":VoltageTarget-SP").is_empty());
        // no waiting phase
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_mode_never_selects_step() {
        let mut h = harness(TransitionMode::Fixed, 7000, 600.0);
        h.sequencer.run().await;

        assert_eq!(
            statuses(&mut h.rx),
            vec![ProgressStatus::ToFixed, ProgressStatus::Done]
        );
        let mode_writes = h.writer.calls_ending_with(":Step-SP_Backend");
        assert_eq!(mode_writes.len(), 1);
        assert_eq!(mode_writes[0].value, PvValue::Int(0));
        assert_eq!(h.writer.calls_ending_with(":VoltageTarget-SP").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_ends_in_failed() {
        let mut h = harness(TransitionMode::StepToFixed, 5000, 5.0);
        h.writer.fail_pv("PumpA:Step-SP_Backend");

        let outcome = h.sequencer.run().await;
        assert_eq!(outcome.state, SequencerState::Failed);
        assert!(outcome
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("PumpA:Step-SP_Backend"));

        let events = statuses(&mut h.rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ProgressStatus::Failed(_)));
        // never reached the waiting or fixed legs
        assert_eq!(h.writer.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let mut h = harness(TransitionMode::StepToFixed, 5000, 600.0);
        let cancel = h.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            cancel.cancel();
        });

        let outcome = h.sequencer.run().await;
        assert_eq!(outcome.state, SequencerState::Cancelled);
        assert!(h.writer.calls_ending_with(":VoltageTarget-SP").is_empty());
        assert_eq!(statuses(&mut h.rx).last(), Some(&ProgressStatus::Cancelled));
    }
}

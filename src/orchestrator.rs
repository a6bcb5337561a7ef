//! Multi-device orchestration.
//!
//! An [`Orchestrator`] turns a [`RunRequest`] into one [`Sequencer`] task per
//! device, joined at a barrier: the run finishes only when every device is Done,
//! Failed or Cancelled. A device failure is recorded in the [`RunReport`] and never
//! stops its siblings. Only errors outside the device tasks (malformed descriptors,
//! a panicked task) fail the run as a whole.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vacs_uhv::adapters::DryRunWriter;
//! use vacs_uhv::config::Config;
//! use vacs_uhv::device::DeviceDescriptor;
//! use vacs_uhv::messages::TransitionMode;
//! use vacs_uhv::orchestrator::{Orchestrator, RunRequest};
//!
//! # async fn demo() -> vacs_uhv::error::AppResult<()> {
//! let orchestrator = Orchestrator::new(Arc::new(DryRunWriter::new()), &Config::default());
//! let mut events = orchestrator.subscribe();
//!
//! let devices = vec![DeviceDescriptor::new("PumpA", [("C1", "PumpA-C1")])];
//! let request = RunRequest::new(TransitionMode::StepToFixed, 5000, 600.0, devices)?;
//! let handle = orchestrator.start(request)?;
//!
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//! });
//! let report = handle.wait().await?;
//! assert!(report.all_done());
//! # Ok(())
//! # }
//! ```

use crate::adapters::PvWriter;
use crate::config::{Config, TimingConfig};
use crate::device::{validate_descriptors, DeviceDescriptor};
use crate::error::{AppResult, PumpError};
use crate::messages::{RunEvent, TransitionMode, TransitionParameters};
use crate::sequencer::{DeviceOutcome, ProgressSink, Sequencer, SequencerState};
use crate::transition::TransitionPrimitives;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What to run: one mode and one parameter set, applied to every listed device.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Transition mode
    pub mode: TransitionMode,
    /// Validated voltage and delay
    pub params: TransitionParameters,
    /// Devices to sequence
    pub devices: Vec<DeviceDescriptor>,
}

impl RunRequest {
    /// Validate raw parameters and build a request.
    ///
    /// # Errors
    ///
    /// `PumpError::Validation` for an out-of-range voltage or a negative delay.
    pub fn new(
        mode: TransitionMode,
        voltage: i64,
        delay_secs: f64,
        devices: Vec<DeviceDescriptor>,
    ) -> AppResult<Self> {
        Ok(Self {
            mode,
            params: TransitionParameters::new(voltage, delay_secs)?,
            devices,
        })
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: Uuid,
    /// Mode the run used
    pub mode: TransitionMode,
    /// Parameters the run used
    pub parameters: TransitionParameters,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Time from start until the last device finished
    pub elapsed: Duration,
    /// One outcome per device, sorted by prefix
    pub outcomes: Vec<DeviceOutcome>,
}

impl RunReport {
    /// Devices that reached `Done`.
    pub fn succeeded(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == SequencerState::Done)
    }

    /// Devices that ended in `Failed`.
    pub fn failed(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.state == SequencerState::Failed)
    }

    /// Whether every device reached `Done`.
    pub fn all_done(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.state == SequencerState::Done)
    }

    /// Outcome for one device.
    pub fn outcome(&self, device_prefix: &str) -> Option<&DeviceOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.device_prefix == device_prefix)
    }
}

/// One in-flight run. Dropping the handle does not stop the run; call [`RunHandle::cancel`].
pub struct RunHandle {
    run_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<AppResult<RunReport>>,
}

impl RunHandle {
    /// Run identifier, as carried by this run's events.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Ask every device task to stop at its next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that cancels this run, for wiring to signals or UI buttons.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for every device to reach a terminal state.
    pub async fn wait(self) -> AppResult<RunReport> {
        self.task
            .await
            .map_err(|e| PumpError::Unexpected(format!("run task did not complete: {}", e)))?
    }
}

/// Launches runs and publishes their events.
pub struct Orchestrator {
    writer: Arc<dyn PvWriter>,
    timing: TimingConfig,
    events: broadcast::Sender<RunEvent>,
}

impl Orchestrator {
    /// Orchestrator writing through `writer` with timing and channel size from `config`.
    pub fn new(writer: Arc<dyn PvWriter>, config: &Config) -> Self {
        Self::with_timing(writer, config.timing, config.events.channel_capacity)
    }

    /// Orchestrator with explicit timing and event channel capacity.
    pub fn with_timing(
        writer: Arc<dyn PvWriter>,
        timing: TimingConfig,
        channel_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            writer,
            timing,
            events,
        }
    }

    /// Subscribe to events of every run started after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Validate `request` and launch it. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `PumpError::Unexpected` for malformed or duplicated device descriptors; nothing
    /// is written in that case.
    pub fn start(&self, request: RunRequest) -> AppResult<RunHandle> {
        validate_descriptors(&request.devices)?;

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let primitives =
            TransitionPrimitives::new(Arc::clone(&self.writer), self.timing, cancel.clone());
        let sink = ProgressSink::new(run_id, self.events.clone());

        let task = tokio::spawn(
            execute(run_id, request, primitives, sink, cancel.clone())
                .instrument(info_span!("run", %run_id)),
        );

        Ok(RunHandle {
            run_id,
            cancel,
            task,
        })
    }

    /// Start a run and wait for it.
    pub async fn run(&self, request: RunRequest) -> AppResult<RunReport> {
        self.start(request)?.wait().await
    }
}

async fn execute(
    run_id: Uuid,
    request: RunRequest,
    primitives: TransitionPrimitives,
    sink: ProgressSink,
    cancel: CancellationToken,
) -> AppResult<RunReport> {
    let started_at = Utc::now();
    let clock = Instant::now();
    let RunRequest {
        mode,
        params,
        devices,
    } = request;

    sink.publish(RunEvent::Started {
        run_id,
        devices: devices.iter().map(|d| d.prefix.clone()).collect(),
    });
    info!(
        %mode,
        voltage = params.voltage(),
        delay_secs = params.delay().as_secs_f64(),
        devices = devices.len(),
        "run started"
    );

    let mut tasks = JoinSet::new();
    for device in devices {
        let span = info_span!("sequencer", device = %device.prefix);
        let sequencer = Sequencer::new(
            Arc::new(device),
            mode,
            params,
            primitives.clone(),
            sink.clone(),
        );
        tasks.spawn(sequencer.run().instrument(span));
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                if let Some(reason) = &outcome.error {
                    warn!(device = %outcome.device_prefix, %reason, "device failed, continuing with the rest");
                }
                outcomes.push(outcome);
            }
            Err(e) => {
                cancel.cancel();
                tasks.abort_all();
                let reason = format!("device task aborted: {}", e);
                error!(%reason, "run aborted");
                sink.publish(RunEvent::Aborted {
                    run_id,
                    reason: reason.clone(),
                });
                return Err(PumpError::Unexpected(reason));
            }
        }
    }
    outcomes.sort_by(|a, b| a.device_prefix.cmp(&b.device_prefix));

    let report = RunReport {
        run_id,
        mode,
        parameters: params,
        started_at,
        elapsed: clock.elapsed(),
        outcomes,
    };
    info!(
        done = report.succeeded().count(),
        failed = report.failed().count(),
        elapsed = ?report.elapsed,
        "run finished"
    );
    sink.publish(RunEvent::Finished {
        run_id,
        report: report.clone(),
    });
    Ok(report)
}

//! Latest-status view of a run, built from its event stream.
//!
//! Front-ends keep one [`StatusBoard`] per run and feed it every [`RunEvent`]
//! they receive. It holds exactly what a status table shows: the last status
//! of each device, in launch order.

use crate::messages::{ProgressStatus, RunEvent};
use crate::orchestrator::RunReport;
use std::collections::HashMap;
use uuid::Uuid;

/// Last known status of every device in one run.
#[derive(Debug, Default)]
pub struct StatusBoard {
    run_id: Option<Uuid>,
    order: Vec<String>,
    latest: HashMap<String, ProgressStatus>,
    report: Option<RunReport>,
    aborted: Option<String>,
}

impl StatusBoard {
    /// Empty board waiting for a `Started` event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the board.
    ///
    /// The first `Started` event pins the board to that run; events carrying any
    /// other run id are ignored from then on, so several runs may share one
    /// subscription.
    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Started { run_id, devices } => {
                if self.accepts(*run_id) {
                    *self = Self {
                        run_id: Some(*run_id),
                        order: devices.clone(),
                        ..Self::default()
                    };
                }
            }
            RunEvent::Progress { run_id, event } => {
                if !self.accepts(*run_id) {
                    return;
                }
                if !self.order.contains(&event.device_prefix) {
                    self.order.push(event.device_prefix.clone());
                }
                self.latest
                    .insert(event.device_prefix.clone(), event.status.clone());
            }
            RunEvent::Finished { run_id, report } => {
                if self.accepts(*run_id) {
                    self.report = Some(report.clone());
                }
            }
            RunEvent::Aborted { run_id, reason } => {
                if self.accepts(*run_id) {
                    self.aborted = Some(reason.clone());
                }
            }
        }
    }

    /// Run this board follows, once its `Started` event arrived.
    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    fn accepts(&self, run_id: Uuid) -> bool {
        self.run_id.is_none() || self.run_id == Some(run_id)
    }

    /// Last status reported by `device_prefix`.
    pub fn status(&self, device_prefix: &str) -> Option<&ProgressStatus> {
        self.latest.get(device_prefix)
    }

    /// `(device, last status)` rows in launch order. Devices yet to report are skipped.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &ProgressStatus)> {
        self.order
            .iter()
            .filter_map(|d| self.latest.get(d).map(|s| (d.as_str(), s)))
    }

    /// Devices whose last status is `Failed`, in launch order.
    pub fn failed_devices(&self) -> Vec<&str> {
        self.rows()
            .filter(|(_, s)| matches!(s, ProgressStatus::Failed(_)))
            .map(|(d, _)| d)
            .collect()
    }

    /// Whether the run is over, either finished or aborted.
    pub fn is_finished(&self) -> bool {
        self.report.is_some() || self.aborted.is_some()
    }

    /// Final report, once `Finished` arrived.
    pub fn report(&self) -> Option<&RunReport> {
        self.report.as_ref()
    }

    /// Abort reason, if the run died.
    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ProgressEvent;
    use std::time::Duration;

    fn progress(run_id: Uuid, device: &str, status: ProgressStatus) -> RunEvent {
        RunEvent::Progress {
            run_id,
            event: ProgressEvent::new(device, status),
        }
    }

    #[test]
    fn test_board_keeps_latest_status() {
        let run_id = Uuid::new_v4();
        let mut board = StatusBoard::new();
        board.apply(&RunEvent::Started {
            run_id,
            devices: vec!["PumpB".into(), "PumpA".into()],
        });
        board.apply(&progress(run_id, "PumpA", ProgressStatus::ToStep));
        board.apply(&progress(run_id, "PumpB", ProgressStatus::ToStep));
        board.apply(&progress(
            run_id,
            "PumpA",
            ProgressStatus::Remaining(Duration::from_secs(5)),
        ));
        board.apply(&progress(
            run_id,
            "PumpB",
            ProgressStatus::Failed("timed out".into()),
        ));

        assert_eq!(
            board.status("PumpA"),
            Some(&ProgressStatus::Remaining(Duration::from_secs(5)))
        );
        let rows: Vec<_> = board.rows().map(|(d, _)| d).collect();
        assert_eq!(rows, vec!["PumpB", "PumpA"]);
        assert_eq!(board.failed_devices(), vec!["PumpB"]);
        assert!(!board.is_finished());
    }

    #[test]
    fn test_started_resets_board() {
        let mut board = StatusBoard::new();
        board.apply(&progress(Uuid::new_v4(), "PumpA", ProgressStatus::Done));
        board.apply(&RunEvent::Started {
            run_id: Uuid::new_v4(),
            devices: vec!["PumpC".into()],
        });
        assert!(board.status("PumpA").is_none());
        assert_eq!(board.rows().count(), 0);
    }

    #[test]
    fn test_overlapping_runs_do_not_mix() {
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();
        let mut board = StatusBoard::new();

        board.apply(&RunEvent::Started {
            run_id: run_a,
            devices: vec!["PumpA".into()],
        });
        board.apply(&progress(run_a, "PumpA", ProgressStatus::ToStep));
        board.apply(&RunEvent::Started {
            run_id: run_b,
            devices: vec!["PumpB".into()],
        });
        board.apply(&progress(run_b, "PumpB", ProgressStatus::ToStep));
        board.apply(&progress(run_a, "PumpA", ProgressStatus::Done));
        board.apply(&progress(run_b, "PumpB", ProgressStatus::Failed("rejected".into())));

        assert_eq!(board.run_id(), Some(run_a));
        let rows: Vec<_> = board.rows().map(|(d, _)| d).collect();
        assert_eq!(rows, vec!["PumpA"]);
        assert_eq!(board.status("PumpA"), Some(&ProgressStatus::Done));
        assert!(board.status("PumpB").is_none());
        assert!(board.failed_devices().is_empty());
    }

    #[test]
    fn test_aborted_finishes_board() {
        let run_id = Uuid::new_v4();
        let mut board = StatusBoard::new();
        board.apply(&RunEvent::Started {
            run_id,
            devices: vec![],
        });
        board.apply(&RunEvent::Aborted {
            run_id: Uuid::new_v4(),
            reason: "other run".into(),
        });
        assert!(!board.is_finished());

        board.apply(&RunEvent::Aborted {
            run_id,
            reason: "panic".into(),
        });
        assert!(board.is_finished());
        assert_eq!(board.aborted(), Some("panic"));
    }
}

//! Operator utilities for Agilent 4UHV ion-pump controllers.
//!
//! The library drives controllers between STEP (stepped voltage) and FIXED
//! (constant target voltage) modes by writing EPICS process variables. A run
//! applies one [`messages::TransitionMode`] to many devices at once, each device
//! in its own task, and reports per-device progress on a broadcast channel.
//!
//! - [`orchestrator`]: fan-out/fan-in over devices, run handles and reports
//! - [`sequencer`]: per-device state machine (STEP, wait, FIXED)
//! - [`transition`]: the STEP and FIXED write sequences
//! - [`adapters`]: process-variable writers (`caput`, dry-run, mock)
//! - [`directory`]: device descriptor sources (inventory service, files)
//! - [`status`]: per-device status table folded from run events
//! - [`alarms`]: pressure alarm threshold writes
//!
//! Two binaries sit on top: `agilent4uhv` and `pressure_alarms`.

pub mod adapters;
pub mod alarms;
pub mod config;
pub mod device;
pub mod directory;
pub mod error;
pub mod logging;
pub mod messages;
pub mod orchestrator;
pub mod sequencer;
pub mod status;
pub mod transition;

//! agilent4uhv CLI
//!
//! Moves Agilent 4UHV controllers between STEP and FIXED voltage modes, all
//! selected devices at once, printing one line per progress event.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

use vacs_uhv::adapters::writer_from_config;
use vacs_uhv::config::{Config, WriterBackend};
use vacs_uhv::device::{filter_by_prefix, select_by_prefix, DeviceDescriptor};
use vacs_uhv::directory::{DeviceDirectory, DeviceListFile, HttpDirectory, JsonFileDirectory};
use vacs_uhv::logging;
use vacs_uhv::messages::{RunEvent, TransitionMode, TransitionParameters, VOLTAGE_MIN};
use vacs_uhv::orchestrator::{Orchestrator, RunReport, RunRequest};

const TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Exit status when at least one device did not reach Done.
const EXIT_INCOMPLETE: u8 = 2;

#[derive(Parser)]
#[command(name = "agilent4uhv")]
#[command(about = "Switch Agilent 4UHV ion-pump controllers between STEP and FIXED voltage modes")]
struct Cli {
    /// Transition to apply to every selected device
    #[arg(long, value_enum, required_unless_present = "list")]
    mode: Option<TransitionMode>,

    /// FIXED-mode target voltage (3000..=7000)
    #[arg(long, default_value_t = VOLTAGE_MIN, allow_negative_numbers = true)]
    voltage: i64,

    /// Seconds to stay in STEP before switching to FIXED (step_to_fixed only)
    #[arg(long, default_value_t = 600.0, allow_negative_numbers = true)]
    step_to_fixed_delay: f64,

    /// Only devices whose prefix contains this text
    #[arg(long, default_value = "")]
    filter: String,

    /// Only these device prefixes (repeatable)
    #[arg(long = "device")]
    devices: Vec<String>,

    /// Read devices from a whitespace-separated list file instead of the inventory service
    #[arg(long, conflicts_with = "inventory")]
    device_list: Option<PathBuf>,

    /// Read devices from a saved inventory JSON file
    #[arg(long)]
    inventory: Option<PathBuf>,

    /// Writer backend (overrides configuration)
    #[arg(long, value_enum)]
    writer: Option<WriterBackend>,

    /// Path to config file (default: config/agilent4uhv.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the selected devices and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    // Parameters first: a bad voltage must not cost a network round-trip
    let params = TransitionParameters::new(cli.voltage, cli.step_to_fixed_delay)?;

    let mut config = match &cli.config {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            Config::load_from(path)?
        }
        None => Config::load()?,
    };
    if let Some(backend) = cli.writer {
        config.writer.backend = backend;
    }
    logging::init(&config);

    let devices = load_devices(&cli, &config).await?;

    if cli.list {
        for device in &devices {
            let channels: Vec<_> = device.channel_prefixes().collect();
            println!("{}\t{}", device.prefix, channels.join(" "));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let Some(mode) = cli.mode else {
        bail!("--mode is required");
    };

    info!(
        %mode,
        voltage = params.voltage(),
        delay_secs = params.delay().as_secs_f64(),
        writer = ?config.writer.backend,
        devices = devices.len(),
        "starting run"
    );

    let orchestrator = Orchestrator::new(writer_from_config(&config.writer), &config);
    let events = orchestrator.subscribe();
    let handle = orchestrator.start(RunRequest {
        mode,
        params,
        devices,
    })?;

    let printer = tokio::spawn(print_events(events, handle.run_id()));
    let cancel = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let result = handle.wait().await;
    interrupt.abort();
    if let Err(e) = printer.await {
        warn!(error = %e, "progress printer stopped abnormally");
    }

    let report = result?;
    print_summary(&report);
    Ok(if report.all_done() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INCOMPLETE)
    })
}

async fn load_devices(cli: &Cli, config: &Config) -> Result<Vec<DeviceDescriptor>> {
    let directory: Box<dyn DeviceDirectory> = match (&cli.device_list, &cli.inventory) {
        (Some(path), _) => Box::new(DeviceListFile::new(path)),
        (None, Some(path)) => Box::new(JsonFileDirectory::new(path)),
        (None, None) => Box::new(HttpDirectory::new(&config.directory)?),
    };

    let all = directory
        .fetch()
        .await
        .with_context(|| format!("loading devices from {}", directory.describe()))?;
    let filtered = filter_by_prefix(&all, &cli.filter);

    if cli.devices.is_empty() {
        Ok(filtered)
    } else {
        Ok(select_by_prefix(&filtered, &cli.devices)?)
    }
}

async fn print_events(mut events: broadcast::Receiver<RunEvent>, run_id: Uuid) {
    loop {
        match events.recv().await {
            Ok(RunEvent::Started { devices, .. }) => {
                println!("{} starting {} device(s)", now(), devices.len());
            }
            Ok(RunEvent::Progress { event: progress, .. }) => {
                println!("{} {} {}", now(), progress.device_prefix, progress.status);
            }
            Ok(RunEvent::Finished { run_id: finished, .. }) if finished == run_id => break,
            Ok(RunEvent::Aborted { run_id: aborted, reason }) if aborted == run_id => {
                println!("{} run aborted: {}", now(), reason);
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "progress output fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!(
        "{} mode={} voltage={} elapsed={:.1}s",
        now(),
        report.mode,
        report.parameters.voltage(),
        report.elapsed.as_secs_f64()
    );
    for outcome in &report.outcomes {
        match &outcome.error {
            Some(reason) => println!("  {:<28} {} ({})", outcome.device_prefix, outcome.state, reason),
            None => println!("  {:<28} {}", outcome.device_prefix, outcome.state),
        }
    }
    println!(
        "{} done, {} failed, {} total",
        report.succeeded().count(),
        report.failed().count(),
        report.outcomes.len()
    );
}

fn now() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}

//! pressure_alarms CLI
//!
//! Writes `.HIGH` / `.HIHI` pressure alarm limits to every gauge PV in a list file.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use vacs_uhv::adapters::writer_from_config;
use vacs_uhv::alarms::{apply_alarms, parse_pv_list, AlarmThresholds};
use vacs_uhv::config::{Config, WriterBackend};
use vacs_uhv::logging;

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    /// Booster, transport lines, test stands (HIGH 1e-8, HIHI 1e-7)
    Booster,
    /// Storage ring (HIGH 1e-9, HIHI 1e-8)
    StorageRing,
}

#[derive(Parser)]
#[command(name = "pressure_alarms")]
#[command(about = "Set HIGH/HIHI pressure alarm limits on vacuum gauge PVs")]
struct Cli {
    /// File with one gauge PV per line
    pv_list: PathBuf,

    /// Threshold preset
    #[arg(long, value_enum, default_value = "booster")]
    preset: Preset,

    /// Minor alarm limit (overrides the preset, needs --hihi)
    #[arg(long, requires = "hihi")]
    high: Option<f64>,

    /// Major alarm limit (overrides the preset, needs --high)
    #[arg(long, requires = "high")]
    hihi: Option<f64>,

    /// Writer backend (overrides configuration)
    #[arg(long, value_enum)]
    writer: Option<WriterBackend>,

    /// Path to config file (default: config/agilent4uhv.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let thresholds = match (cli.high, cli.hihi) {
        (Some(high), Some(hihi)) => AlarmThresholds::new(high, hihi)?,
        _ => match cli.preset {
            Preset::Booster => AlarmThresholds::BOOSTER,
            Preset::StorageRing => AlarmThresholds::STORAGE_RING,
        },
    };

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(backend) = cli.writer {
        config.writer.backend = backend;
    }
    logging::init(&config);

    let text = tokio::fs::read_to_string(&cli.pv_list)
        .await
        .with_context(|| format!("reading {}", cli.pv_list.display()))?;
    let pvs = parse_pv_list(&text);
    info!(count = pvs.len(), high = thresholds.high(), hihi = thresholds.hihi(), "applying alarm limits");

    let writer = writer_from_config(&config.writer);
    let writes = apply_alarms(
        writer.as_ref(),
        &pvs,
        thresholds,
        config.timing.write_timeout(),
    )
    .await;

    let mut failed = 0;
    for write in &writes {
        match &write.result {
            Ok(()) => println!("{} {}", write.pv, write.value),
            Err(e) => {
                failed += 1;
                println!("{} {} FAILED: {}", write.pv, write.value, e);
            }
        }
    }

    if failed > 0 {
        eprintln!("{} of {} alarm writes failed", failed, writes.len());
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

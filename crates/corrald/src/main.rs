//! corrald: the corral scheduler daemon.
//!
//! Assembles the scheduler subsystems in one process:
//! - State store (redb, or in-memory without a data directory)
//! - Capability store + placement engine
//! - Scheduler service with logging notifier
//! - Reservation-expiry loop
//!
//! # Usage
//!
//! ```text
//! corrald simulate --config corral.toml --scenario fleet.json --data-dir /var/lib/corral
//! corrald check-config --config corral.toml
//! ```

mod runner;
mod scenario;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use corral_placement::{CapabilityStore, PlacementEngine};
use corral_scheduler::{Collaborators, RecordingNotifier, SchedulerConfig, SchedulerService};
use corral_state::StateStore;
use tracing::info;

use crate::runner::DaemonNotifier;
use crate::scenario::Scenario;

#[derive(Parser)]
#[command(name = "corrald", about = "corral scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a fleet's capability reports and run scheduler calls against it.
    Simulate {
        /// Scheduler configuration (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Scenario file (JSON).
        #[arg(long)]
        scenario: PathBuf,

        /// Data directory for persistent state. In-memory when omitted.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Validate a configuration file and print it with defaults filled in.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON report.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,corrald=debug,corral=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            config,
            scenario,
            data_dir,
        } => run_simulate(config.as_deref(), &scenario, data_dir.as_deref()).await,
        Command::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => {
            let config = SchedulerConfig::from_file(path)?;
            info!(path = ?path, "configuration loaded");
            Ok(config)
        }
        None => Ok(SchedulerConfig::default()),
    }
}

fn open_store(data_dir: Option<&Path>) -> anyhow::Result<StateStore> {
    match data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let db_path = dir.join("corral.redb");
            let store = StateStore::open(&db_path)?;
            info!(path = ?db_path, "state store opened");
            Ok(store)
        }
        None => {
            info!("state store opened in memory");
            Ok(StateStore::open_in_memory()?)
        }
    }
}

async fn run_simulate(
    config_path: Option<&Path>,
    scenario_path: &Path,
    data_dir: Option<&Path>,
) -> anyhow::Result<()> {
    info!("corral daemon starting simulation");

    let config = load_config(config_path)?;
    let scenario = Scenario::from_file(scenario_path)?;
    let store = open_store(data_dir)?;

    // ── Initialize subsystems ──────────────────────────────────

    let capabilities = Arc::new(CapabilityStore::new());
    let engine = PlacementEngine::from_config(capabilities, &config.placement)?;

    let recorded = Arc::new(RecordingNotifier::new());
    let collaborators =
        Collaborators::from_store(store.clone(), Arc::new(DaemonNotifier::new(recorded.clone())));
    let service = Arc::new(SchedulerService::new(engine, collaborators, config));
    info!("scheduler service initialized");

    // ── Run ────────────────────────────────────────────────────

    let report = runner::run_scenario(service, store, recorded, scenario).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!(steps = report.steps.len(), "corral simulation finished");
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = SchedulerConfig::from_file(path)?;
    // Fails on unknown filter or weigher names.
    PlacementEngine::from_config(Arc::new(CapabilityStore::new()), &config.placement)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

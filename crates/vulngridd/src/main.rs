//! vulngridd: the vulngrid daemon.
//!
//! Single binary that assembles the active component engine:
//! - State store (redb)
//! - Process aggregator
//! - Active component updater and its executable cache
//! - Ingestion pipeline (startup bootstrap + optional seed file)
//!
//! # Usage
//!
//! ```text
//! vulngridd run --config /etc/vulngrid/vulngridd.toml --seed fixtures.json
//! ```

mod config;
mod ingest;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use vulngrid_aggregator::Aggregator;
use vulngrid_state::StateStore;
use vulngrid_updater::{Stores, Updater};

use crate::config::DaemonConfig;
use crate::ingest::{Pipeline, Seed};

#[derive(Parser)]
#[command(name = "vulngridd", about = "vulngrid active component daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion pipeline and the periodic updater until Ctrl-C.
    Run {
        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Reconciliation interval in seconds.
        #[arg(long)]
        interval: Option<u64>,

        /// JSON file of images, deployments and indicators to ingest at startup.
        #[arg(long)]
        seed: Option<PathBuf>,

        /// Turn active component tracking off.
        #[arg(long)]
        disable_active_vuln_mgmt: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            interval,
            seed,
            disable_active_vuln_mgmt,
        } => {
            let config = match config {
                Some(path) => DaemonConfig::from_file(&path)?,
                None => DaemonConfig::default(),
            }
            .with_overrides(data_dir, interval, disable_active_vuln_mgmt)?;

            init_tracing(&config.log_filter)?;
            run_daemon(config, seed).await
        }
    }
}

fn init_tracing(fallback: &str) -> anyhow::Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::try_new(fallback)?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn run_daemon(config: DaemonConfig, seed: Option<PathBuf>) -> anyhow::Result<()> {
    info!(
        enabled = config.active_vuln_mgmt,
        interval_secs = config.update_interval_secs,
        "vulngrid daemon starting"
    );

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.db_path();

    // ── Initialize subsystems ──────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let aggregator = Arc::new(Aggregator::new());
    let updater = Arc::new(Updater::new(
        Stores::from_state(state.clone()),
        aggregator.clone(),
        config.updater_config(),
    ));
    let pipeline = Pipeline::new(state, aggregator, updater.clone());

    pipeline.bootstrap()?;
    if let Some(path) = seed {
        pipeline.ingest_seed(Seed::from_file(&path)?)?;
    }

    // ── Updater loop ───────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let updater_handle = tokio::spawn({
        let updater = updater.clone();
        async move {
            updater.run(shutdown_rx).await;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = updater_handle.await;

    info!("vulngrid daemon stopped");
    Ok(())
}

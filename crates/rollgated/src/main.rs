//! rollgated — the Rollgate daemon.
//!
//! Single binary that assembles the rollout control plane:
//! - State store (redb)
//! - Local traffic manager
//! - Store-backed metric provider
//! - Rollout controller loop
//! - REST API
//!
//! # Usage
//!
//! ```text
//! rollgated standalone --port 8700 --data-dir /var/lib/rollgate
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use rollgate_controller::{ControllerConfig, RolloutController, SystemClock};
use rollgate_metrics::StoreMetricProvider;
use rollgate_state::StateStore;
use rollgate_traffic::LocalTrafficManager;

#[derive(Parser)]
#[command(name = "rollgated", about = "Rollgate daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (single-node, local traffic manager).
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "8700")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/rollgate")]
        data_dir: PathBuf,

        /// Optional TOML config file; flags override its values.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Seconds between reconcile sweeps.
        #[arg(long)]
        tick_interval: Option<u64>,

        /// Rollouts reconciled concurrently within one sweep.
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rollgated=debug,rollgate=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            config,
            tick_interval,
            workers,
        } => run_standalone(port, data_dir, config, tick_interval, workers).await,
    }
}

async fn run_standalone(
    port: u16,
    data_dir: PathBuf,
    config_path: Option<PathBuf>,
    tick_interval: Option<u64>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    info!("Rollgate daemon starting in standalone mode");

    // Layer CLI flags over the config file, over built-in defaults.
    let mut config = match &config_path {
        Some(path) => ControllerConfig::from_file(path)?,
        None => ControllerConfig::default(),
    };
    if let Some(secs) = tick_interval {
        config.tick_interval_secs = secs;
    }
    if let Some(count) = workers {
        config.max_concurrent_reconciles = count;
    }

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("rollgate.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let traffic = Arc::new(LocalTrafficManager::new());
    let provider = Arc::new(StoreMetricProvider::new(store.clone()));

    let controller = RolloutController::new(
        store.clone(),
        traffic,
        provider,
        Arc::new(SystemClock),
        config,
    );
    info!("rollout controller initialized");

    // Pick in-flight rollouts back up from persisted status.
    let resumed = controller.resume_active()?;
    if !resumed.is_empty() {
        info!(count = resumed.len(), "resumed active rollouts");
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start controller loop ──────────────────────────────────

    let loop_controller = controller.clone();
    let controller_handle = tokio::spawn(async move {
        loop_controller.run(shutdown_rx).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = rollgate_api::build_router(store, controller);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for the controller loop.
    let _ = controller_handle.await;

    info!("Rollgate daemon stopped");
    Ok(())
}

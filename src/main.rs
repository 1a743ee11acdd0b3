//! # levelwatch
//!
//! Runs a level-triggered controller against an in-memory store.
//!
//! ## Startup
//!
//! 1. **Configuration** - load `ControllerConfig` from TOML (or defaults) and apply CLI overrides
//! 2. **Store** - create the in-memory store and load the optional seed file
//! 3. **Controller** - list, wait for the cache to sync, start the workers
//!
//! ## Shutdown
//!
//! Ctrl+C or SIGTERM stops the informer and the queue. Queued keys are still
//! processed and in-flight reconciles finish before the process exits.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use levelwatch::cli::{Cli, Commands};
use levelwatch::demo::{load_seed, seed_store, LoggingReconciler};
use levelwatch_controller::Controller;
use levelwatch_core::ControllerConfig;
use levelwatch_store::{DynamicObject, InMemoryStore, TracingStore};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            seed,
            workers,
        } => run(config.as_deref(), seed.as_deref(), workers).await,
        Commands::CheckConfig { path } => check_config(&path),
    }
}

/// Initialize tracing with `RUST_LOG`, defaulting to `info`.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(path: Option<&Path>, workers: Option<usize>) -> Result<ControllerConfig> {
    let mut config = match path {
        Some(path) => ControllerConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    if let Some(workers) = workers {
        config.workers = workers;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run(config: Option<&Path>, seed: Option<&Path>, workers: Option<usize>) -> Result<()> {
    let config = load_config(config, workers)?;

    let store = Arc::new(InMemoryStore::<DynamicObject>::new());
    if let Some(seed) = seed {
        let objects = load_seed(seed).context("Failed to load seed data")?;
        let count = seed_store(&store, objects)
            .await
            .context("Failed to seed the store")?;
        info!(objects = count, path = %seed.display(), "Store seeded");
    }

    let controller = Controller::new(TracingStore::new(Arc::clone(&store)), LoggingReconciler, config)
        .context("Failed to create controller")?;

    controller
        .run_until(wait_for_shutdown())
        .await
        .context("Controller failed")?;

    info!("levelwatch stopped");
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = ControllerConfig::from_file(path)
        .with_context(|| format!("Configuration {} is invalid", path.display()))?;

    println!("{}: ok", path.display());
    println!("  workers:          {}", config.workers);
    println!("  max_retries:      {}", config.max_retries);
    println!(
        "  resync_interval:  {}",
        config
            .resync_interval()
            .map_or_else(|| "disabled".to_string(), |d| format!("{}s", d.as_secs()))
    );
    println!(
        "  sync_timeout:     {}",
        config
            .sync_timeout()
            .map_or_else(|| "none".to_string(), |d| format!("{}s", d.as_secs()))
    );
    println!("  enqueue_deletes:  {}", config.enqueue_deletes);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received, stopping controller");
}

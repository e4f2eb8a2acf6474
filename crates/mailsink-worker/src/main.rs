//! Mailsink Worker - batch mail ingestion daemon

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mailsink_common::logging::{init_logging, LogConfig, LogLevel};
use mailsink_worker::config::{self, AppConfig};
use mailsink_worker::index::weaviate::{self, WeaviateIndex};
use mailsink_worker::index::MailIndex;
use mailsink_worker::orchestrator::Orchestrator;
use mailsink_worker::pool::{self, WorkerDirs};
use mailsink_worker::{dispatch, lifecycle, status::StatusStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// How long to wait for one shutdown sentinel to be accepted by the queue.
const STOP_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long to wait for each worker to finish its current batch.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "mailsink-worker")]
#[command(author, version, about = "Mailsink batch ingestion worker")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        cfg.logging.level
    };
    init_logging(&LogConfig::from_env(log_level, "mailsink-worker")?)?;
    info!(config = %cli.config.display(), "Starting mailsink worker");

    run(cfg).await
}

async fn run(cfg: AppConfig) -> Result<()> {
    for dir in [
        &cfg.paths.wait_dir,
        &cfg.paths.run_dir,
        &cfg.paths.buggy_dir,
    ] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating directory {}", dir.display()))?;
    }
    if let Some(parent) = cfg.paths.sqlite_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }

    let store = StatusStore::new(&cfg.paths.sqlite_path);
    store
        .ensure_schema()
        .await
        .context("initializing status database")?;

    // Provision the collection up front on the main task: starting the
    // dispatch loop against a broken index store risks silent data loss,
    // so this failure is fatal.
    let weaviate_cfg = Arc::new(cfg.weaviate.clone());
    let tenants = weaviate::tenant_cache();
    let bootstrap = WeaviateIndex::new(weaviate_cfg.clone(), tenants.clone())?;
    bootstrap
        .ensure_collection()
        .await
        .context("ensuring index collection; refusing to start")?;
    drop(bootstrap);

    // Files stranded in run/ by a prior crash become candidates again
    // before the first tick.
    lifecycle::recover_startup(&cfg.paths.run_dir, &cfg.paths.wait_dir);

    let (queue, rx) = dispatch::channel(cfg.queue.maxsize);
    let token = CancellationToken::new();
    spawn_signal_handler(token.clone());

    let dirs = WorkerDirs {
        run_dir: cfg.paths.run_dir.clone(),
        buggy_dir: cfg.paths.buggy_dir.clone(),
    };
    let factory = {
        let weaviate_cfg = weaviate_cfg.clone();
        let tenants = tenants.clone();
        move |_worker: usize| WeaviateIndex::new(weaviate_cfg.clone(), tenants.clone())
    };
    let workers = pool::spawn_workers(
        cfg.worker.threads,
        rx,
        token.clone(),
        store.clone(),
        dirs,
        factory,
    );
    info!(workers = workers.len(), queue = cfg.queue.maxsize, "Worker pool started");

    let orchestrator = Orchestrator::new(
        cfg.paths.wait_dir.clone(),
        cfg.paths.run_dir.clone(),
        cfg.worker.poll_interval(),
        queue.clone(),
        store,
        token.clone(),
    );
    if let Err(e) = orchestrator.run().await {
        error!(error = %e, "Dispatch loop exited with error");
    }

    // Termination protocol: make sure everyone sees the cancellation, then
    // one sentinel per worker, then a bounded join.
    token.cancel();
    for _ in 0..workers.len() {
        if !queue.send_stop(STOP_ENQUEUE_TIMEOUT).await {
            break;
        }
    }
    workers.join(WORKER_JOIN_TIMEOUT).await;
    info!("Shutdown complete");
    Ok(())
}

/// Cancel the token exactly once on SIGINT or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut terminate = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    info!("Shutdown signal received");
                    token.cancel();
                    return;
                },
            };
            tokio::select! {
                _ = ctrl_c => {},
                _ = terminate.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("Shutdown signal received");
        token.cancel();
    });
}

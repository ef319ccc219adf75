//! Binary host for the `dispatch-core` worker pool.
//!
//! Owns process-level concerns the library crate deliberately has no
//! opinion about: CLI/env configuration, log initialization, and a
//! minimal stdin/stdout task ingress for manual exercise of the pool --
//! real ingress (message brokers, HTTP, LISTEN/NOTIFY) is an application
//! concern that simply calls `Pool::dispatch`, per `SPEC_FULL.md` §1.

mod config;

use std::sync::Arc;

use clap::Parser;
use config::{CliArgs, ServerConfig};
use dispatch_core::{Pool, TaskMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!(
        min_workers = config.pool.min_workers,
        max_workers = config.pool.max_workers,
        worker_command = %config.pool.worker_command.display(),
        "starting dispatch pool"
    );

    let (pool, outbound_rx) = Pool::new(config.pool);
    let forking_lock = Arc::new(Mutex::new(()));
    pool.start_working(outbound_rx, forking_lock).await;

    let ingress_pool = pool.clone();
    let ingress = tokio::spawn(async move { run_stdin_ingress(ingress_pool).await });

    shutdown_signal(pool.fatal_signal()).await;

    ingress.abort();
    pool.shutdown().await;

    tracing::info!("dispatch-server exiting");
    Ok(())
}

/// Reads newline-delimited `TaskMessage` JSON from stdin and dispatches
/// each one. A line that fails to parse is logged and skipped; this is a
/// demo ingress only, not part of the service's contract.
async fn run_stdin_ingress(pool: Arc<Pool>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("stdin ingress closed");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "error reading stdin ingress");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message: TaskMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(line = %line, error = %e, "ignoring malformed task message on stdin ingress");
                continue;
            }
        };

        if let Err(e) = pool.dispatch(message).await {
            tracing::warn!(error = %e, "failed to dispatch task from stdin ingress");
        }
    }
}

async fn shutdown_signal(fatal: Arc<dispatch_core::FatalSignal>) {
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C signal"),
        () = terminate => tracing::info!("received SIGTERM signal"),
        () = fatal.wait() => tracing::error!(reason = ?fatal.reason(), "internal task failed fatally, shutting down"),
    }
}

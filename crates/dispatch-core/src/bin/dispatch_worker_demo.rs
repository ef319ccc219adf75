//! Demo worker-side executor: the subprocess every `dispatch-core` worker
//! forks and speaks the stdin/stdout JSON-line protocol with.
//!
//! The real executor a production deployment spawns is an application
//! concern and deliberately out of scope (`SPEC_FULL.md` §6 treats it as
//! a black box behind the inbound/outbound channel contract); this binary
//! exists so the pool has something real to fork in integration tests
//! and so `dispatch-core`'s `[[bin]]` target builds standalone. It
//! understands a small fixed set of demo task kinds:
//!
//! - `sleep` / `sleep-10` / any name prefixed `sleep`: sleeps for
//!   `args.seconds` (default 1.0), racing an out-of-band cancel signal.
//! - `echo`: returns `args` serialized back as the result, immediately.
//! - `fail`: returns a `"error: <task>"` result immediately, simulating
//!   a task that completes with an application-level failure (the core
//!   does not distinguish this from any other non-cancel result).
//!
//! Any other task name falls back to the `sleep` behavior with the
//! default duration, so ad hoc task names used only for duplicate-key
//! distinctness in tests still complete.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Notify;

const CANCEL_RESULT: &str = "<cancel>";

#[derive(Debug, Deserialize)]
struct TaskMessage {
    #[serde(default)]
    uuid: String,
    task: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    #[allow(dead_code)]
    kwargs: Value,
    #[serde(default)]
    #[allow(dead_code)]
    timeout: Option<f64>,
}

fn worker_id_from_args() -> u64 {
    let args: Vec<String> = std::env::args().collect();
    args.iter().position(|a| a == "--worker-id").and_then(|i| args.get(i + 1)).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn sleep_seconds(args: &Value) -> f64 {
    args.get("seconds").and_then(Value::as_f64).unwrap_or(1.0).max(0.0)
}

/// Installs the SIGUSR1 handler on unix and returns a [`Notify`] that
/// fires once per delivered signal. Non-unix targets return a `Notify`
/// that never fires, since out-of-band cancellation isn't available.
fn install_cancel_signal() -> Arc<Notify> {
    let notify = Arc::new(Notify::new());

    #[cfg(unix)]
    {
        let notify = notify.clone();
        tokio::spawn(async move {
            let mut stream = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to install SIGUSR1 handler");
                    return;
                }
            };
            loop {
                stream.recv().await;
                notify.notify_waiters();
            }
        });
    }

    notify
}

async fn run_task(message: TaskMessage, cancel: &Notify) -> Option<String> {
    tracing::debug!(uuid = %message.uuid, task = %message.task, "executing task");
    if message.task == "echo" {
        return Some(message.args.to_string());
    }
    if message.task == "fail" {
        return Some(format!("error: {}", message.task));
    }

    let seconds = sleep_seconds(&message.args);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => Some(message.task),
        _ = cancel.notified() => Some(CANCEL_RESULT.to_string()),
    }
}

#[derive(serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WorkerEvent {
    Ready,
    Shutdown,
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
}

async fn emit(stdout: &mut tokio::io::Stdout, event: &WorkerEvent) {
    let Ok(line) = serde_json::to_string(event) else {
        tracing::error!("failed to serialize outbound event");
        return;
    };
    if stdout.write_all(line.as_bytes()).await.is_err() || stdout.write_all(b"\n").await.is_err() {
        return;
    }
    let _ = stdout.flush().await;
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let worker_id = worker_id_from_args();
    let cancel = install_cancel_signal();
    let mut stdout = tokio::io::stdout();

    emit(&mut stdout, &WorkerEvent::Ready).await;
    tracing::debug!(worker_id, "worker demo ready");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!(worker_id, "stdin closed, exiting");
                break;
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "error reading stdin");
                break;
            }
        };

        if line.trim() == "\"stop\"" {
            break;
        }

        let message: TaskMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(worker_id, line = %line, error = %e, "ignoring malformed task message");
                continue;
            }
        };

        let result = run_task(message, &cancel).await;
        emit(&mut stdout, &WorkerEvent::Done { result }).await;
    }

    emit(&mut stdout, &WorkerEvent::Shutdown).await;
}

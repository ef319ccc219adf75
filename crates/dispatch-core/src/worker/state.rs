//! Per-worker state record and lifecycle operations.
//!
//! Grounded on `pool.py`'s `PoolWorker` class: the field set, the
//! `start`/`start_task`/`signal_stop`/`stop`/`cancel`/`next_wakeup`
//! operations, and the escalating-kill ladder in `stop()` are carried
//! over verbatim in spirit, re-expressed with the status machine in
//! [`crate::worker::status::WorkerStatus`].

use std::time::Duration;

use tokio::sync::mpsc;

use crate::message::{OutboundMessage, TaskMessage, WorkerInbound};
use crate::time::{self, Instant};
use crate::wakeup::HasWakeup;
use crate::worker::process::ProcessProxy;
use crate::worker::status::WorkerStatus;

const EXIT_SIGNAL_WAIT: Duration = Duration::from_secs(3);
const JOIN_WAIT: Duration = Duration::from_secs(3);
const KILL_RETRY_WAIT: Duration = Duration::from_secs(1);
const KILL_RETRIES: u32 = 3;
/// Upper bound on the random jitter added to each kill-retry wait, so a
/// fleet-wide reap of many stuck workers at once doesn't send every kill
/// signal in the same instant.
const KILL_RETRY_JITTER_MAX_MS: u64 = 250;

fn kill_retry_jitter() -> Duration {
    use rand::Rng;
    Duration::from_millis(rand::rng().random_range(0..=KILL_RETRY_JITTER_MAX_MS))
}

/// A snapshot of worker state suitable for introspection/control-plane
/// reporting. Mirrors `PoolWorker.get_data()`.
#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub worker_id: u64,
    pub pid: Option<u32>,
    pub status: WorkerStatus,
    pub finished_count: u64,
    pub current_task: Option<String>,
    pub current_task_uuid: Option<String>,
    pub active_cancel: bool,
    pub age: Duration,
}

pub struct Worker {
    pub worker_id: u64,
    pub process: ProcessProxy,
    pub current_task: Option<Box<TaskMessage>>,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub stopping_at: Option<Instant>,
    pub retired_at: Option<Instant>,
    pub is_active_cancel: bool,
    pub finished_count: u64,
    pub status: WorkerStatus,
    exit_signaled: std::sync::Arc<tokio::sync::Notify>,
}

impl Worker {
    pub fn new(worker_id: u64, process: ProcessProxy) -> Self {
        Self {
            worker_id,
            process,
            current_task: None,
            created_at: time::now(),
            started_at: None,
            stopping_at: None,
            retired_at: None,
            is_active_cancel: false,
            finished_count: 0,
            status: WorkerStatus::Initialized,
            exit_signaled: std::sync::Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    pub fn counts_for_capacity(&self) -> bool {
        self.status.counts_for_capacity()
    }

    pub fn inactive(&self) -> bool {
        self.status.inactive()
    }

    /// Forks the subprocess. Precondition: `status == Initialized`.
    pub fn start(&mut self, outbound_tx: mpsc::UnboundedSender<OutboundMessage>) {
        if self.status != WorkerStatus::Initialized {
            tracing::error!(worker_id = self.worker_id, status = %self.status, "worker is not initialized, cannot start");
            return;
        }
        self.status = WorkerStatus::Spawned;
        match self.process.start(outbound_tx) {
            Ok(()) => {
                tracing::debug!(worker_id = self.worker_id, pid = ?self.process.pid(), "worker subprocess spawned");
                // Not ready until it sends its own ready callback.
                self.status = WorkerStatus::Starting;
            }
            Err(e) => {
                tracing::error!(worker_id = self.worker_id, error = %e, "failed to start worker subprocess, marking as error");
                self.status = WorkerStatus::Error;
            }
        }
    }

    /// Marks this worker busy and writes the task to its inbound queue.
    pub fn start_task(&mut self, message: Box<TaskMessage>) {
        self.process.send(WorkerInbound::Task(message.clone()));
        self.current_task = Some(message);
        self.started_at = Some(time::now());
    }

    /// Tells the worker to stop and return; cancels its current task
    /// first if one is running, since the worker is about to be torn
    /// down regardless of that task's own timeout.
    pub fn signal_stop(&mut self) {
        self.process.send(WorkerInbound::Stop);
        if let Some(task) = &self.current_task {
            tracing::warn!(worker_id = self.worker_id, uuid = task.uuid_or_unknown(), "worker is currently running task, canceling for shutdown");
            self.cancel();
        }
        self.status = WorkerStatus::Stopping;
        self.stopping_at = Some(time::now());
    }

    /// Delivers an out-of-band cancellation signal. Advisory: completion
    /// is observed later as a `done` event with a `<cancel>` result.
    pub fn cancel(&mut self) {
        self.is_active_cancel = true;
        self.process.deliver_cancel_signal();
    }

    pub fn mark_exited(&mut self) {
        self.status = WorkerStatus::Exited;
        self.exit_signaled.notify_waiters();
    }

    /// Idempotent terminal shutdown: signal, wait for the exit report,
    /// join, then escalate to repeated kills if the process refuses to
    /// leave. Never panics or propagates an error -- a worker that
    /// cannot be killed is logged at `critical` severity and left
    /// `Error` for the management loop to reap on its normal schedule.
    pub async fn stop(&mut self) {
        if matches!(self.status, WorkerStatus::Retired | WorkerStatus::Error) {
            return;
        }

        if !matches!(self.status, WorkerStatus::Stopping | WorkerStatus::Exited) {
            self.signal_stop();
        }

        if self.status != WorkerStatus::Exited {
            let notified = self.exit_signaled.notified();
            if tokio::time::timeout(EXIT_SIGNAL_WAIT, notified).await.is_err() {
                tracing::error!(worker_id = self.worker_id, pid = ?self.process.pid(), "worker failed to send exit message in time");
                self.status = WorkerStatus::Error;
            }
        }

        self.process.join(JOIN_WAIT).await;

        for attempt in 0..KILL_RETRIES {
            if self.process.is_alive() {
                tracing::error!(worker_id = self.worker_id, pid = ?self.process.pid(), attempt, "worker still alive, sending kill");
                tokio::time::sleep(KILL_RETRY_WAIT + kill_retry_jitter()).await;
                self.process.kill();
            } else {
                tracing::debug!(worker_id = self.worker_id, pid = ?self.process.pid(), exit_code = ?self.process.exit_code(), "worker exited");
                self.status = WorkerStatus::Retired;
                self.retired_at = Some(time::now());
                return;
            }
        }

        tracing::error!(worker_id = self.worker_id, pid = ?self.process.pid(), "worker failed to exit after kill escalation");
        self.status = WorkerStatus::Error;
        self.retired_at = Some(time::now());
    }

    pub fn mark_finished_task(&mut self) {
        self.is_active_cancel = false;
        self.current_task = None;
        self.started_at = None;
        self.finished_count += 1;
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: self.worker_id,
            pid: self.process_pid(),
            status: self.status,
            finished_count: self.finished_count,
            current_task: self.current_task.as_ref().map(|t| t.task.clone()),
            current_task_uuid: self.current_task.as_ref().map(|t| t.uuid_or_unknown().to_string()),
            active_cancel: self.is_active_cancel,
            age: time::now().saturating_duration_since(self.created_at),
        }
    }

    fn process_pid(&self) -> Option<u32> {
        // &self here since pid() only needs &self; is_alive needs &mut.
        self.process.pid()
    }
}

impl HasWakeup for Worker {
    fn next_wakeup(&self) -> Option<Instant> {
        if self.is_active_cancel {
            return None;
        }
        let task = self.current_task.as_ref()?;
        let started_at = self.started_at?;
        let timeout = task.timeout?;
        Some(started_at + Duration::from_secs_f64(timeout.max(0.0)))
    }

    fn wakeup_key(&self) -> u64 {
        self.worker_id
    }
}

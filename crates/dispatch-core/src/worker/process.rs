//! Subprocess handle and factory.
//!
//! Generalizes the teacher's in-process `mpsc`-backed worker
//! (`ferroid-tonic-server/src/server/pool/{manager,worker}.rs`) to a real OS
//! subprocess: [`ProcessProxy`] owns one `tokio::process::Child`, its
//! inbound writer task, and its outbound reader task; [`ProcessManager`]
//! is the factory plus the shared outbound channel every proxy forwards
//! into.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::{OutboundMessage, WorkerEvent, WorkerInbound};

/// One worker subprocess's handle: enough to write task messages to it,
/// observe whether it is alive, and kill/join it.
pub struct ProcessProxy {
    worker_id: u64,
    command: PathBuf,
    args: Vec<String>,
    child: Option<Child>,
    inbound_tx: Option<mpsc::UnboundedSender<WorkerInbound>>,
    writer_task: Option<tokio::task::JoinHandle<()>>,
    reader_task: Option<tokio::task::JoinHandle<()>>,
}

impl ProcessProxy {
    fn new(worker_id: u64, command: PathBuf, args: Vec<String>) -> Self {
        Self {
            worker_id,
            command,
            args,
            child: None,
            inbound_tx: None,
            writer_task: None,
            reader_task: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Best-effort liveness probe. `try_wait` does not block; `Ok(None)`
    /// means the child is still running.
    pub fn is_alive(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn exit_code(&mut self) -> Option<i32> {
        self.child.as_mut().and_then(|c| c.try_wait().ok().flatten()).and_then(|s| s.code())
    }

    /// Forks the subprocess and wires its stdin/stdout to the inbound
    /// queue and shared outbound channel.
    pub fn start(&mut self, outbound_tx: mpsc::UnboundedSender<OutboundMessage>) -> Result<()> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg("--worker-id")
            .arg(self.worker_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::ProcessSpawn)?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<WorkerInbound>();
        let worker_id = self.worker_id;

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                let line = match &msg {
                    WorkerInbound::Stop => "\"stop\"".to_string(),
                    WorkerInbound::Task(task) => match serde_json::to_string(task.as_ref()) {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::error!(worker_id, error = %e, "failed to serialize task message");
                            continue;
                        }
                    },
                };
                if stdin.write_all(line.as_bytes()).await.is_err() || stdin.write_all(b"\n").await.is_err() {
                    tracing::debug!(worker_id, "worker stdin closed, writer task exiting");
                    break;
                }
                let _ = stdin.flush().await;
            }
        });

        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<WorkerEvent>(&line) {
                        Ok(event) => {
                            if outbound_tx.send(OutboundMessage::Worker { worker_id, event }).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(worker_id, line = %line, error = %e, "ignoring malformed worker output line");
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(worker_id, error = %e, "error reading worker stdout");
                        break;
                    }
                }
            }
        });

        self.child = Some(child);
        self.inbound_tx = Some(inbound_tx);
        self.writer_task = Some(writer_task);
        self.reader_task = Some(reader_task);
        Ok(())
    }

    /// Enqueues a message for the subprocess; silently dropped if the
    /// writer task has already exited (the subprocess is gone).
    pub fn send(&self, msg: WorkerInbound) {
        if let Some(tx) = &self.inbound_tx {
            let _ = tx.send(msg);
        }
    }

    /// Delivers an out-of-band cancellation signal (SIGUSR1) to the pid.
    /// A no-op if the process never started or has already exited.
    #[cfg(unix)]
    pub fn deliver_cancel_signal(&self) {
        if let Some(pid) = self.pid() {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGUSR1) {
                tracing::debug!(pid, error = %e, "failed to deliver cancel signal, worker likely already gone");
            }
        }
    }

    #[cfg(not(unix))]
    pub fn deliver_cancel_signal(&self) {
        tracing::warn!("out-of-band cancellation is only implemented on unix targets");
    }

    /// Best-effort non-blocking wait with a timeout.
    pub async fn join(&mut self, timeout: std::time::Duration) {
        if let Some(child) = &mut self.child {
            let _ = tokio::time::timeout(timeout, child.wait()).await;
        }
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
    }

    /// Forceful termination. Safe to call repeatedly.
    pub fn kill(&mut self) {
        if let Some(child) = &mut self.child {
            // start_kill issues the kill without requiring an await; a
            // subsequent join reaps the zombie.
            let _ = child.start_kill();
        }
    }
}

impl Drop for ProcessProxy {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.take() {
            task.abort();
        }
    }
}

/// Factory for [`ProcessProxy`] instances and holder of the shared
/// outbound sender every worker's reader task forwards into. Cheap to
/// clone-share (`Arc`'d by [`crate::pool::Pool`]); the matching receiver
/// lives in [`OutboundReceiver`], owned exclusively by the results loop.
pub struct ProcessManager {
    worker_command: PathBuf,
    worker_args: Vec<String>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
}

/// The results loop's exclusive handle on the shared outbound channel.
/// Split out from [`ProcessManager`] so the manager itself can be shared
/// (`&self`) across the dispatch and management paths while only one
/// task ever calls `read_finished`.
pub struct OutboundReceiver {
    outbound_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl ProcessManager {
    pub fn new(worker_command: PathBuf, worker_args: Vec<String>) -> (Self, OutboundReceiver) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (Self { worker_command, worker_args, outbound_tx }, OutboundReceiver { outbound_rx })
    }

    /// Creates an unspawned proxy for `worker_id`; call `.start()` on the
    /// returned proxy (via [`crate::worker::state::Worker::start`]) to fork.
    pub fn create_process(&self, worker_id: u64) -> ProcessProxy {
        ProcessProxy::new(worker_id, self.worker_command.clone(), self.worker_args.clone())
    }

    pub fn outbound_sender(&self) -> mpsc::UnboundedSender<OutboundMessage> {
        self.outbound_tx.clone()
    }

    /// Posts the administrative stop sentinel, unblocking a pending
    /// `read_finished` during shutdown.
    pub fn post_stop_sentinel(&self) {
        let _ = self.outbound_tx.send(OutboundMessage::Stop);
    }
}

impl OutboundReceiver {
    /// Reads the next result from the shared outbound channel. Used by
    /// the results loop; see `SPEC_FULL.md` §4.7.
    pub async fn read_finished(&mut self) -> Option<OutboundMessage> {
        self.outbound_rx.recv().await
    }
}

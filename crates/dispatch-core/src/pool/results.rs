//! Results ingestion loop.
//!
//! Grounded on `pool.py: WorkerPool.read_results_forever`,
//! `process_finished`.

use std::sync::atomic::Ordering;

use crate::message::{OutboundMessage, WorkerEvent, CANCEL_RESULT};
use crate::time;

use super::Pool;

impl Pool {
    /// Perpetual task that consumes the shared outbound channel and
    /// drives worker state transitions from it.
    pub(crate) async fn read_results_forever(&self, mut outbound: crate::worker::OutboundReceiver) {
        loop {
            let Some(message) = outbound.read_finished().await else {
                tracing::error!("outbound channel closed unexpectedly, results task exiting");
                return;
            };

            let (worker_id, event) = match message {
                OutboundMessage::Stop => {
                    if self.shutting_down.load(Ordering::SeqCst) {
                        let statuses: Vec<_> = {
                            let state = self.state.lock().await;
                            state.workers.values().map(|w| w.status.as_str()).collect()
                        };
                        tracing::debug!(?statuses, "results task got administrative stop message");
                        return;
                    }
                    tracing::error!("results channel got stop message while not shutting down");
                    continue;
                }
                OutboundMessage::Worker { worker_id, event } => (worker_id, event),
            };

            match event {
                WorkerEvent::Ready => {
                    let all_ready = {
                        let mut state = self.state.lock().await;
                        if let Some(worker) = state.workers.get_mut(&worker_id) {
                            worker.status = crate::worker::WorkerStatus::Ready;
                        }
                        !state.workers.is_empty() && state.workers.values().all(|w| w.is_ready())
                    };
                    if all_ready {
                        self.events.workers_ready.set();
                    }
                    self.drain_queue().await;
                }
                WorkerEvent::Shutdown => {
                    let all_inactive = {
                        let mut state = self.state.lock().await;
                        if let Some(worker) = state.workers.get_mut(&worker_id) {
                            worker.mark_exited();
                        }
                        state.workers.values().all(|w| w.inactive())
                    };

                    if self.shutting_down.load(Ordering::SeqCst) {
                        if all_inactive {
                            tracing::debug!(worker_id, "worker exited and that is all of them, exiting results task");
                            return;
                        }
                        tracing::debug!(worker_id, "worker exited while shutting down, waiting on the rest");
                    } else {
                        self.events.management_event.set();
                        tracing::debug!(worker_id, "worker sent unsolicited exit signal");
                    }
                }
                WorkerEvent::Done { result } => {
                    self.process_finished(worker_id, result).await;
                    self.drain_queue().await;
                }
            }
        }
    }

    /// Clears a worker's busy state on task completion, classifies the
    /// outcome into `finished`/`canceled`, stamps the scale-down clock
    /// for the busy-count level just vacated, and kicks the wakeup
    /// runner if the task carried a timeout.
    async fn process_finished(&self, worker_id: u64, result: Option<String>) {
        let had_timeout;
        {
            let mut state = self.state.lock().await;
            let running_ct = state.running_count();
            state.last_used_by_ct.insert(running_ct, Some(time::now()));

            let Some(worker) = state.workers.get_mut(&worker_id) else {
                tracing::warn!(worker_id, "got done event for unknown worker");
                return;
            };

            let uuid = worker.current_task.as_ref().map(|t| t.uuid_or_unknown().to_string()).unwrap_or_else(|| "<unknown>".to_string());
            had_timeout = worker.current_task.as_ref().and_then(|t| t.timeout).is_some();
            let was_active_cancel = worker.is_active_cancel;
            let canceled = was_active_cancel && result.as_deref() == Some(CANCEL_RESULT);

            tracing::debug!(
                worker_id,
                uuid,
                finished_count = worker.finished_count,
                canceled,
                result = result.as_deref(),
                "worker finished task"
            );

            if canceled {
                state.canceled_count += 1;
                #[cfg(feature = "metrics")]
                self.metrics.record_canceled();
            } else {
                state.finished_count += 1;
                #[cfg(feature = "metrics")]
                self.metrics.record_finished();
            }
            let worker = state.workers.get_mut(&worker_id).expect("checked above");
            worker.mark_finished_task();

            if state.queuer.count() == 0 && state.workers.values().all(|w| w.current_task.is_none()) {
                self.events.work_cleared.set();
            }
        }

        if had_timeout {
            if let Some(runner) = self.wakeup_runner.lock().await.as_ref() {
                runner.kick();
            }
        }
    }
}

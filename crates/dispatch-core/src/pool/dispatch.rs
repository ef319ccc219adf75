//! Dispatch entry point and queue draining.
//!
//! Grounded on `pool.py: WorkerPool.dispatch_task`, `drain_queue`, and
//! `post_task_start`.

use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::message::TaskMessage;
use crate::queue::Queuer;

use super::Pool;

impl Pool {
    /// Entry point for producers submitting new work. Never fails once
    /// accepted -- it either runs, queues, discards, or (only once the
    /// pool is fully torn down) rejects with [`Error::ServiceShuttingDown`].
    pub async fn dispatch(&self, message: TaskMessage) -> Result<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(Error::ServiceShuttingDown);
        }

        let uuid = message.uuid_or_unknown().to_string();
        let message = Box::new(message);

        let dispatched = {
            let mut state = self.state.lock().await;
            let running_match = state.running_keys().contains(&message.duplicate_key());
            #[cfg(feature = "metrics")]
            let discard_count_before = state.blocker.discard_count();
            let Some(unblocked) = state.blocker.process_task(message, running_match) else {
                #[cfg(feature = "metrics")]
                if state.blocker.discard_count() > discard_count_before {
                    self.metrics.record_discarded();
                }
                return Ok(());
            };

            if self.is_shutting_down() {
                tracing::debug!(uuid = %uuid, "pool is shutting down, queuing message instead of dispatching");
                state.queuer.append(unblocked);
                return Ok(());
            }

            match Queuer::get_free_worker(&state.workers) {
                Some(worker_id) => {
                    let worker = state.workers.get_mut(&worker_id).expect("worker_id came from this map");
                    tracing::debug!(uuid = %uuid, worker_id, "dispatching task to worker");
                    worker.start_task(unblocked);
                    true
                }
                None => {
                    state.queuer.append(unblocked);
                    false
                }
            }
        };

        if dispatched {
            self.post_task_start(&uuid).await;
        } else {
            self.events.management_event.set();
        }
        Ok(())
    }

    /// Runs after a task is handed to a worker: kicks the timeout runner
    /// if the task carries one, and blocks the current busy-count from
    /// being eligible for scale-down until it's no longer at that level.
    async fn post_task_start(&self, uuid: &str) {
        if let Some(runner) = self.wakeup_runner.lock().await.as_ref() {
            runner.kick();
        }
        #[cfg(feature = "metrics")]
        self.metrics.record_dispatch();
        let mut state = self.state.lock().await;
        let running_ct = state.running_count();
        state.last_used_by_ct.insert(running_ct, None);
        tracing::trace!(uuid = %uuid, running_ct, "post task start bookkeeping complete");
    }

    /// Moves eligible messages from the Blocker into the Queuer, then
    /// dispatches everything the Queuer can currently place on a free
    /// worker. Invoked after every `ready`/`done` event.
    pub async fn drain_queue(&self) {
        let mut newly_unblocked = Vec::new();
        {
            let mut state = self.state.lock().await;
            let running_keys = state.running_keys();
            for message in state.blocker.pop_unblocked_messages(&running_keys) {
                newly_unblocked.push(message);
            }
        }
        if !newly_unblocked.is_empty() {
            let mut state = self.state.lock().await;
            for message in newly_unblocked {
                state.queuer.append(message);
            }
        }

        let mut processed_any = false;
        loop {
            if self.is_shutting_down() {
                break;
            }
            let popped = {
                let mut state = self.state.lock().await;
                if Queuer::get_free_worker(&state.workers).is_none() {
                    None
                } else {
                    state.queuer.pop_eligible()
                }
            };
            let Some(message) = popped else { break };
            let uuid = message.uuid_or_unknown().to_string();
            // Route back through dispatch_task's worker-assignment step;
            // the duplicate check was already settled when this message
            // first entered the Blocker/Queuer, so re-run only the
            // worker-assignment half here.
            let dispatched = {
                let mut state = self.state.lock().await;
                match Queuer::get_free_worker(&state.workers) {
                    Some(worker_id) => {
                        let worker = state.workers.get_mut(&worker_id).expect("worker_id came from this map");
                        worker.start_task(message);
                        true
                    }
                    None => {
                        state.queuer.append(message);
                        false
                    }
                }
            };
            if dispatched {
                self.post_task_start(&uuid).await;
                processed_any = true;
            } else {
                break;
            }
        }

        if processed_any {
            self.events.queue_cleared.set();
        }
    }
}

//! Autoscale and worker-lifecycle management loop.
//!
//! Grounded on `pool.py: WorkerPool.manage_workers`, `scale_workers`,
//! `manage_new_workers`, `manage_old_workers`, `up`, `cancel_worker`, and
//! `should_scale_down`. The three "died unexpectedly" branches in
//! `manage_old_workers` are grounded additionally on
//! `tests/unit/service/test_worker_liveness.py`'s three scenarios.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;

use crate::time;
use crate::worker::Worker;

use super::Pool;

impl Pool {
    /// Creates (but does not yet spawn) a new worker. Returns its id.
    pub(crate) async fn up(&self) -> u64 {
        let mut state = self.state.lock().await;
        let worker_id = state.next_worker_id;
        state.next_worker_id += 1;
        let process = self.process_manager.create_process(worker_id);
        state.workers.insert(worker_id, Worker::new(worker_id, process));
        #[cfg(feature = "metrics")]
        self.metrics.record_worker_spawned();
        worker_id
    }

    /// True if the current busy-worker-count level has gone unused longer
    /// than `scaledown_wait`, per the open-question decision recorded in
    /// `DESIGN.md`: keyed and compared using the same "currently busy"
    /// definition the reference implementation uses.
    async fn should_scale_down(&self) -> bool {
        let state = self.state.lock().await;
        let worker_ct = state.available_count();
        match state.last_used_by_ct.get(&worker_ct) {
            Some(Some(last_used)) => time::now().saturating_duration_since(*last_used) > self.config.scaledown_wait,
            _ => false,
        }
    }

    async fn scale_workers(&self) {
        let (worker_ct, active_task_ct) = {
            let state = self.state.lock().await;
            (state.available_count(), state.running_count() + state.queuer.count())
        };

        if worker_ct < self.config.min_workers {
            let mut spawned = Vec::new();
            for _ in 0..(self.config.min_workers - worker_ct) {
                spawned.push(self.up().await);
            }
            tracing::info!(?spawned, prior_ct = worker_ct, "starting subprocesses to satisfy min_workers");
        } else if active_task_ct > worker_ct {
            if worker_ct < self.config.max_workers {
                let new_worker_id = self.up().await;
                tracing::info!(new_worker_id, prior_ct = worker_ct, "started worker to handle queue pressure");
            } else {
                tracing::warn!(max_workers = self.config.max_workers, "at max_workers with queue pressure detected, capacity may be insufficient");
            }
        } else if worker_ct > self.config.min_workers && self.should_scale_down().await {
            let mut state = self.state.lock().await;
            if let Some(worker) = state.workers.values_mut().find(|w| w.counts_for_capacity() && w.current_task.is_none()) {
                tracing::info!(worker_id = worker.worker_id, prior_ct = worker_ct, "scaling down worker due to idle demand");
                worker.signal_stop();
            }
        }
    }

    /// Forks the subprocess for every worker still `Initialized`. Serial
    /// against producer-side connection setup via `forking_lock`.
    async fn manage_new_workers(&self, forking_lock: &Arc<Mutex<()>>) {
        let initialized_ids: Vec<u64> = {
            let state = self.state.lock().await;
            state.workers.values().filter(|w| w.status == crate::worker::WorkerStatus::Initialized).map(|w| w.worker_id).collect()
        };

        for worker_id in initialized_ids {
            {
                let _forking_guard = forking_lock.lock().await;
                let outbound_tx = self.process_manager.outbound_sender();
                let mut state = self.state.lock().await;
                if let Some(worker) = state.workers.get_mut(&worker_id) {
                    worker.start(outbound_tx);
                }
            }
            // Starting the worker may have freed capacity for queued work.
            self.drain_queue().await;
        }
    }

    /// Reconciles worker bookkeeping: detects unexpected deaths, happy-path
    /// stops exited workers, escalates unresponsive stops, and removes
    /// long-retired/errored workers from the fleet.
    async fn manage_old_workers(&self) {
        let to_stop_happy: Vec<u64>;
        let to_stop_aggressive: Vec<u64>;
        let to_remove: Vec<u64>;
        {
            let mut state = self.state.lock().await;
            let mut happy = Vec::new();
            let mut aggressive = Vec::new();
            let mut remove = Vec::new();

            let dead_ids: Vec<u64> = state
                .workers
                .values_mut()
                .filter_map(|worker| {
                    let unexpected_statuses = !matches!(
                        worker.status,
                        crate::worker::WorkerStatus::Retired
                            | crate::worker::WorkerStatus::Error
                            | crate::worker::WorkerStatus::Exited
                            | crate::worker::WorkerStatus::Initialized
                            | crate::worker::WorkerStatus::Spawned
                    );
                    if unexpected_statuses && !worker.process.is_alive() { Some(worker.worker_id) } else { None }
                })
                .collect();

            for worker_id in dead_ids {
                let worker = state.workers.get_mut(&worker_id).expect("id just collected from this map");
                tracing::error!(worker_id, pid = ?worker.process.pid(), status = %worker.status, "worker has died unexpectedly");
                let had_task = if let Some(task) = &worker.current_task {
                    tracing::error!(worker_id, uuid = task.uuid_or_unknown(), "task was running on worker but the worker died unexpectedly");
                    true
                } else {
                    false
                };
                worker.is_active_cancel = false;
                worker.status = crate::worker::WorkerStatus::Error;
                worker.retired_at = Some(time::now());
                if had_task {
                    state.canceled_count += 1;
                    #[cfg(feature = "metrics")]
                    self.metrics.record_canceled();
                }
            }

            for worker in state.workers.values() {
                match worker.status {
                    crate::worker::WorkerStatus::Exited => happy.push(worker.worker_id),
                    crate::worker::WorkerStatus::Stopping => {
                        if let Some(stopping_at) = worker.stopping_at {
                            if time::now().saturating_duration_since(stopping_at) > self.config.worker_stop_wait {
                                tracing::warn!(worker_id = worker.worker_id, "worker failed to respond to stop signal");
                                aggressive.push(worker.worker_id);
                            }
                        }
                    }
                    crate::worker::WorkerStatus::Retired | crate::worker::WorkerStatus::Error => {
                        if let Some(retired_at) = worker.retired_at {
                            if time::now().saturating_duration_since(retired_at) > self.config.worker_removal_wait {
                                remove.push(worker.worker_id);
                            }
                        }
                    }
                    _ => {}
                }
            }

            to_stop_happy = happy;
            to_stop_aggressive = aggressive;
            to_remove = remove;
        }

        // stop() is slow (up to ~6s of escalating kill retries); take the
        // worker out of the fleet map while it runs so the management
        // lock is never held across that wait, then put it back.
        for worker_id in to_stop_happy.into_iter().chain(to_stop_aggressive) {
            let taken = {
                let mut state = self.state.lock().await;
                state.workers.remove(&worker_id)
            };
            if let Some(mut worker) = taken {
                worker.stop().await;
                let mut state = self.state.lock().await;
                state.workers.insert(worker_id, worker);
            }
        }

        for worker_id in to_remove {
            let mut state = self.state.lock().await;
            if state.workers.remove(&worker_id).is_some() {
                tracing::debug!(worker_id, "fully removing worker");
                #[cfg(feature = "metrics")]
                self.metrics.record_worker_retired();
            }
        }
    }

    /// The management task's body. Runs until `shutting_down`.
    pub(crate) async fn manage_workers(self: Arc<Self>, forking_lock: Arc<Mutex<()>>) {
        while !self.shutting_down.load(Ordering::SeqCst) {
            self.scale_workers().await;
            self.manage_new_workers(&forking_lock).await;
            self.manage_old_workers().await;

            tokio::select! {
                _ = self.events.management_event.wait() => {}
                _ = tokio::time::sleep(self.config.scaledown_interval) => {}
            }
            self.events.management_event.clear();
        }
        tracing::debug!("pool worker management task exiting");
    }

    /// Wakeup-runner callback: logs and cancels a worker whose current
    /// task has exceeded its timeout. Re-verifies the worker still has a
    /// live task, guarding against a stale scheduled wakeup racing a
    /// completion.
    pub(crate) async fn cancel_worker(&self, worker_id: u64) {
        let mut state = self.state.lock().await;
        let Some(worker) = state.workers.get_mut(&worker_id) else { return };
        let (Some(task), Some(started_at)) = (&worker.current_task, worker.started_at) else { return };
        let uuid = task.uuid_or_unknown().to_string();
        let timeout = task.timeout;
        let runtime = time::now().saturating_duration_since(started_at);
        tracing::info!(worker_id, uuid = %uuid, runtime_s = runtime.as_secs_f64(), ?timeout, "task exceeded timeout, canceling");
        worker.cancel();
    }
}

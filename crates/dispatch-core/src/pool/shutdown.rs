//! Orchestrated teardown with escalating force.
//!
//! Grounded on `pool.py: WorkerPool.shutdown`, `stop_workers`,
//! `force_shutdown`, generalized with the staged phase structure of
//! `ferroid-tonic-server/src/server/pool/manager.rs::shutdown` (stop
//! accepting work, drain, cancel, notify-and-join every worker
//! concurrently via `join_all`).

use std::sync::atomic::Ordering;

use futures::future::join_all;

use super::Pool;

impl Pool {
    /// Idempotent: a second call observes `shutting_down` already set and
    /// only re-runs the (harmless) internal no-ops.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.events.management_event.set();

        if let Some(runner) = self.wakeup_runner.lock().await.take() {
            runner.shutdown();
        }
        {
            let mut state = self.state.lock().await;
            state.queuer.shutdown();
            state.blocker.shutdown();
        }

        self.stop_workers().await;
        self.process_manager.post_stop_sentinel();

        let results_handle = self.tasks.lock().await.results.take();
        if let Some(mut results_handle) = results_handle {
            tracing::info!("waiting for the results task to return");
            if tokio::time::timeout(self.config.shutdown_timeout, &mut results_handle).await.is_err() {
                tracing::warn!(timeout_s = self.config.shutdown_timeout.as_secs_f64(), "results task failed to return in time, forcing");
                self.force_shutdown().await;
                results_handle.abort();
                tracing::info!("results task had to be canceled, awaiting it a second time");
                let _ = results_handle.await;
            }
        }

        let management_handle = self.tasks.lock().await.management.take();
        if let Some(management_handle) = management_handle {
            tracing::info!("canceling worker management task");
            management_handle.abort();
            if let Err(e) = tokio::time::timeout(self.config.shutdown_timeout, management_handle).await {
                tracing::error!(error = %e, "management task failed to shut down in time");
            }
        }

        let remaining = {
            let state = self.state.lock().await;
            state.queuer.count() + state.blocker.count()
        };
        if remaining > 0 {
            tracing::warn!(remaining, "dropping messages still queued at shutdown");
        }

        tracing::info!("pool is shut down");
        self.torn_down.store(true, Ordering::SeqCst);
    }

    /// Signals every worker to stop, then awaits all of them concurrently.
    async fn stop_workers(&self) {
        let worker_ids: Vec<u64> = {
            let mut state = self.state.lock().await;
            for worker in state.workers.values_mut() {
                worker.signal_stop();
            }
            state.workers.keys().copied().collect()
        };

        let stop_futs = worker_ids.into_iter().map(|worker_id| async move {
            let taken = {
                let mut state = self.state.lock().await;
                state.workers.remove(&worker_id)
            };
            if let Some(mut worker) = taken {
                worker.stop().await;
                let mut state = self.state.lock().await;
                state.workers.insert(worker_id, worker);
            }
        });
        join_all(stop_futs).await;
    }

    /// Invoked when the results task fails to wind down within
    /// `shutdown_timeout`: kills every still-alive subprocess directly.
    /// The caller (the server binary's shutdown path, or a future
    /// `shutdown_with_timeout` wrapper) is responsible for cancelling the
    /// results task's `JoinHandle` itself.
    pub async fn force_shutdown(&self) {
        let mut state = self.state.lock().await;
        for worker in state.workers.values_mut() {
            if worker.process.pid().is_some() && worker.process.is_alive() {
                tracing::warn!(worker_id = worker.worker_id, pid = ?worker.process.pid(), "force killing worker");
                worker.process.kill();
            }
        }
    }
}

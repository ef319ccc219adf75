//! Plain-atomic pool counters, feature-gated behind `metrics`.
//!
//! Grounded on `ferroid-tonic-server/src/server/service/handler.rs`'s
//! static atomic counters (`SHUTDOWN`, `STREAMS_INFLIGHT`) with their
//! `get_`/`increment_`/`decrement_` helper style. The teacher's own
//! OpenTelemetry OTLP export stack is not carried here (see `DESIGN.md`)
//! since this service has no collector endpoint of its own; these
//! counters exist for local introspection and tests.

use portable_atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct PoolMetrics {
    pub tasks_dispatched: AtomicU64,
    pub tasks_finished: AtomicU64,
    pub tasks_canceled: AtomicU64,
    pub tasks_discarded: AtomicU64,
    pub workers_spawned: AtomicU64,
    pub workers_retired: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self) {
        self.tasks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finished(&self) {
        self.tasks_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_canceled(&self) {
        self.tasks_canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.tasks_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_spawned(&self) {
        self.workers_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_retired(&self) {
        self.workers_retired.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = PoolMetrics::new();
        assert_eq!(metrics.tasks_dispatched.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tasks_finished.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tasks_canceled.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.tasks_discarded.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.workers_spawned.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.workers_retired.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn each_recorder_increments_only_its_own_counter() {
        let metrics = PoolMetrics::new();
        metrics.record_dispatch();
        metrics.record_finished();
        metrics.record_canceled();
        metrics.record_discarded();
        metrics.record_worker_spawned();
        metrics.record_worker_retired();

        assert_eq!(metrics.tasks_dispatched.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.tasks_finished.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.tasks_canceled.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.tasks_discarded.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.workers_spawned.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.workers_retired.load(Ordering::Relaxed), 1);
    }
}

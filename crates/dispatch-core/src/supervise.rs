//! Fatal-task supervision.
//!
//! Ambient reliability concern carried regardless of the distilled
//! spec's non-goals (`SPEC_FULL.md` §1.1): "Fatal errors inside internal
//! tasks propagate through a shared fatal-exit signal." `pool.py` relies
//! on a sibling `asyncio_tasks.ensure_fatal` helper at every internal
//! task spawn site; that helper's own source was not retrieved, so this
//! is re-derived from its call-site contract (wrap a spawned task, set a
//! shared signal if it panics) rather than ported line-for-line.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Notify;

/// A shared latch the host process can await to learn that an internal
/// task (management, results, wakeup runner) exited abnormally.
#[derive(Default)]
pub struct FatalSignal {
    notify: Notify,
    fired: AtomicBool,
    reason: std::sync::Mutex<Option<String>>,
}

impl FatalSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn notify_fatal(&self, context: &str) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            tracing::error!(context, "internal task exited abnormally, signaling fatal shutdown");
            *self.reason.lock().expect("fatal signal mutex poisoned") = Some(context.to_string());
            self.notify.notify_waiters();
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().expect("fatal signal mutex poisoned").clone()
    }

    /// Resolves once some supervised task has reported a fatal exit.
    /// Resolves immediately if one already has.
    pub async fn wait(&self) {
        if self.is_fatal() {
            return;
        }
        self.notify.notified().await;
    }
}

/// Spawns `fut` under a panic guard: if it unwinds, `signal` is tripped
/// with `name` as context instead of silently dropping the task.
pub fn ensure_fatal<F>(name: &'static str, signal: Arc<FatalSignal>, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if std::panic::AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            signal.notify_fatal(name);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn normal_completion_does_not_trip_the_signal() {
        let signal = FatalSignal::new();
        let handle = ensure_fatal("ok_task", signal.clone(), async {});
        handle.await.unwrap();
        assert!(!signal.is_fatal());
        assert!(signal.reason().is_none());
    }

    #[tokio::test]
    async fn a_panicking_task_trips_the_signal_with_its_name() {
        let signal = FatalSignal::new();
        let handle = ensure_fatal("panicky_task", signal.clone(), async {
            panic!("boom");
        });
        handle.await.unwrap();
        assert!(signal.is_fatal());
        assert_eq!(signal.reason().as_deref(), Some("panicky_task"));
    }

    #[tokio::test]
    async fn only_the_first_fatal_reason_sticks() {
        let signal = FatalSignal::new();
        ensure_fatal("first", signal.clone(), async { panic!("boom") }).await.unwrap();
        ensure_fatal("second", signal.clone(), async { panic!("boom") }).await.unwrap();
        assert_eq!(signal.reason().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn wait_resolves_immediately_once_already_fired() {
        let signal = FatalSignal::new();
        ensure_fatal("task", signal.clone(), async { panic!("boom") }).await.unwrap();
        tokio::time::timeout(Duration::from_millis(50), signal.wait()).await.expect("wait should not block once fatal");
    }
}

//! Single timer task racing the earliest scheduled wakeup across a live
//! collection of wakeup-producing objects.
//!
//! Grounded on `pool.py`'s `NextWakeupRunner` usage at its one call site
//! (construction over `self.workers.values()`, a `cancel_worker`
//! callback, and `.kick()` on every task start/finish). The Python
//! implementation itself was not retrieved, so the sleep-vs-kick-vs-
//! shutdown race below is an original but narrowly-scoped reconstruction
//! of that contract rather than a port.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::time::{self, Instant};

/// Implemented by anything the wakeup runner can schedule a callback
/// against -- in this crate, only [`crate::worker::Worker`].
pub trait HasWakeup {
    fn next_wakeup(&self) -> Option<Instant>;
    fn wakeup_key(&self) -> u64;
}

/// Fallback poll period when nothing currently has a scheduled wakeup and
/// the runner is only waiting to be kicked; kept short so a provider that
/// briefly raced the kick is still caught promptly.
const IDLE_POLL_FLOOR: Duration = Duration::from_secs(30);

pub struct WakeupRunner {
    kick_tx: mpsc::UnboundedSender<()>,
    shutdown: CancellationToken,
}

impl WakeupRunner {
    /// Spawns the timer task. `provider` is awaited once per tick to get a
    /// fresh snapshot of `(key, wakeup_time)` pairs for every object that
    /// currently has a wakeup scheduled; `callback` is invoked, serially,
    /// for each key whose wakeup has elapsed.
    pub fn spawn<P, PFut, C, CFut>(provider: P, callback: C) -> (Self, tokio::task::JoinHandle<()>)
    where
        P: Fn() -> PFut + Send + 'static,
        PFut: Future<Output = Vec<(u64, Instant)>> + Send + 'static,
        C: Fn(u64) -> CFut + Send + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        let (kick_tx, mut kick_rx) = mpsc::unbounded_channel::<()>();
        let shutdown = CancellationToken::new();
        let shutdown_child = shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                let wakeups = provider().await;
                let now = time::now();

                let mut earliest: Option<Instant> = None;
                let mut due: Vec<u64> = Vec::new();
                for (key, at) in wakeups {
                    if at <= now {
                        due.push(key);
                    } else {
                        earliest = Some(match earliest {
                            Some(e) if e <= at => e,
                            _ => at,
                        });
                    }
                }

                for key in due {
                    callback(key).await;
                }

                let wait = async {
                    match earliest {
                        Some(at) => {
                            tokio::select! {
                                _ = tokio::time::sleep(at.saturating_duration_since(now)) => {}
                                _ = kick_rx.recv() => {}
                            }
                        }
                        None => {
                            tokio::select! {
                                _ = tokio::time::sleep(IDLE_POLL_FLOOR) => {}
                                _ = kick_rx.recv() => {}
                            }
                        }
                    }
                };

                tokio::select! {
                    _ = shutdown_child.cancelled() => return,
                    _ = wait => {}
                }
            }
        });

        (Self { kick_tx, shutdown }, handle)
    }

    /// Recomputes the earliest wakeup immediately rather than waiting for
    /// the current sleep to elapse. Safe to call concurrently; a lost
    /// race (the runner wakes for an unrelated reason just after) is
    /// harmless since it simply re-polls `provider` a little early.
    pub fn kick(&self) {
        let _ = self.kick_tx.send(());
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn fires_callback_once_the_wakeup_elapses() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_provider = hits.clone();
        let due_at = time::now() + Duration::from_millis(50);

        let (runner, _handle) = WakeupRunner::spawn(
            move || {
                let hits = hits_provider.clone();
                async move {
                    let _ = &hits;
                    vec![(1u64, due_at)]
                }
            },
            move |_key: u64| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(hits.load(Ordering::SeqCst) >= 1);
        runner.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn kick_recomputes_the_earliest_wakeup_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_callback = hits.clone();
        let next_due = Arc::new(Mutex::new(time::now() + Duration::from_secs(3600)));
        let next_due_provider = next_due.clone();

        let (runner, _handle) = WakeupRunner::spawn(
            move || {
                let at = *next_due_provider.lock().expect("lock poisoned");
                async move { vec![(7u64, at)] }
            },
            move |_key: u64| {
                let hits = hits_callback.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0, "far-future wakeup must not fire early");

        *next_due.lock().expect("lock poisoned") = time::now();
        runner.kick();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        runner.shutdown();
    }

    #[tokio::test]
    async fn shutdown_stops_the_runner_task() {
        let (runner, handle) = WakeupRunner::spawn(|| async { Vec::new() }, |_key: u64| async {});
        runner.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle).await.expect("runner task should exit promptly").unwrap();
    }
}

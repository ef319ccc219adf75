//! A latching event flag, the async equivalent of `asyncio.Event`.
//!
//! `tokio::sync::Notify` alone only wakes tasks already waiting at the
//! moment `notify_waiters` is called; it has no persistent "is set"
//! state, which `pool.py`'s `PoolEvents` relies on (`workers_ready.set()`
//! then `workers_ready.wait()` from a task that starts afterwards must
//! still return immediately). This wraps `Notify` with an `AtomicBool`
//! to restore that semantics.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Default)]
pub struct EventFlag {
    is_set: AtomicBool,
    notify: Notify,
}

impl EventFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.is_set.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.is_set.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.is_set.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already set; otherwise waits for the next
    /// `set()`.
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn starts_unset() {
        let event = EventFlag::new();
        assert!(!event.is_set());
    }

    #[tokio::test]
    async fn wait_resolves_immediately_once_already_set() {
        let event = EventFlag::new();
        event.set();
        tokio::time::timeout(Duration::from_millis(50), event.wait()).await.expect("wait should not block once set");
    }

    #[tokio::test]
    async fn clear_makes_a_subsequent_wait_block_until_set_again() {
        let event = Arc::new(EventFlag::new());
        event.set();
        event.clear();
        assert!(!event.is_set());

        let waiter = event.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        event.set();
        tokio::time::timeout(Duration::from_millis(50), handle).await.expect("waiter should resolve after set").unwrap();
    }
}

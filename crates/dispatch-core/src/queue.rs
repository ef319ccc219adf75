//! FIFO of messages that are eligible to run but waiting on a free worker.
//!
//! Grounded on `pool.py`'s `Queuer` call sites (`queued_messages.append`,
//! `queued_messages.remove`, `get_free_worker`). Deliberately a separate
//! structure from [`crate::blocker::Blocker`]: this one holds only
//! capacity-blocked messages, which count toward autoscale pressure via
//! [`Queuer::count`].

use std::collections::{HashMap, VecDeque};

use crate::message::TaskMessage;
use crate::worker::Worker;

#[derive(Default)]
pub struct Queuer {
    queued: VecDeque<Box<TaskMessage>>,
    shutting_down: bool,
}

impl Queuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Box<TaskMessage>) {
        self.queued.push_back(message);
    }

    pub fn count(&self) -> usize {
        self.queued.len()
    }

    pub fn shutdown(&mut self) {
        self.shutting_down = true;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// First queued message eligible to run right now. The baseline
    /// policy here is plain FIFO: every queued message is eligible.
    pub fn pop_eligible(&mut self) -> Option<Box<TaskMessage>> {
        self.queued.pop_front()
    }

    pub fn peek_eligible(&self) -> Option<&TaskMessage> {
        self.queued.front().map(|b| b.as_ref())
    }

    /// Scans the fleet for a worker that is ready and not currently busy.
    pub fn get_free_worker(workers: &HashMap<u64, Worker>) -> Option<u64> {
        workers.values().find(|w| w.is_ready() && w.current_task.is_none()).map(|w| w.worker_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OnDuplicate;
    use crate::worker::{ProcessManager, WorkerStatus};

    fn msg(uuid: &str) -> Box<TaskMessage> {
        Box::new(TaskMessage {
            uuid: uuid.to_string(),
            task: "sleep".to_string(),
            args: serde_json::json!({}),
            kwargs: serde_json::json!({}),
            timeout: None,
            on_duplicate: OnDuplicate::Parallel,
            delay: None,
        })
    }

    fn make_worker(id: u64) -> Worker {
        let (manager, _rx) = ProcessManager::new(std::path::PathBuf::from("/bin/true"), Vec::new());
        Worker::new(id, manager.create_process(id))
    }

    #[test]
    fn pop_eligible_is_fifo() {
        let mut q = Queuer::new();
        q.append(msg("a"));
        q.append(msg("b"));
        assert_eq!(q.count(), 2);
        assert_eq!(q.pop_eligible().unwrap().uuid, "a");
        assert_eq!(q.pop_eligible().unwrap().uuid, "b");
        assert!(q.pop_eligible().is_none());
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn peek_eligible_does_not_consume() {
        let mut q = Queuer::new();
        q.append(msg("a"));
        assert_eq!(q.peek_eligible().unwrap().uuid, "a");
        assert_eq!(q.count(), 1);
    }

    #[test]
    fn shutdown_flag_round_trips() {
        let mut q = Queuer::new();
        assert!(!q.is_shutting_down());
        q.shutdown();
        assert!(q.is_shutting_down());
    }

    #[test]
    fn get_free_worker_requires_ready_and_idle() {
        let mut workers = HashMap::new();

        let mut not_ready = make_worker(1);
        not_ready.status = WorkerStatus::Starting;
        workers.insert(1, not_ready);

        let mut busy = make_worker(2);
        busy.status = WorkerStatus::Ready;
        busy.current_task = Some(msg("running"));
        workers.insert(2, busy);

        assert_eq!(Queuer::get_free_worker(&workers), None);

        let mut free = make_worker(3);
        free.status = WorkerStatus::Ready;
        workers.insert(3, free);

        assert_eq!(Queuer::get_free_worker(&workers), Some(3));
    }
}

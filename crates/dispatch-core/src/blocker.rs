//! Holds messages ineligible to run because of the duplicate-suppression
//! policy (`on_duplicate`), as distinct from capacity blocking.
//!
//! Grounded on `pool.py`'s `Blocker` call sites (`process_task`,
//! `pop_unblocked_messages`) and on the exact scenarios asserted by
//! `tests/integration/test_main.py::test_task_discard`,
//! `test_tasks_in_serial`, and `test_tasks_queue_one`. See `SPEC_FULL.md`
//! §4.4 for the full decision table this implements.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::message::{OnDuplicate, TaskMessage};

#[derive(Default)]
pub struct Blocker {
    /// One FIFO per distinct `(task, args, kwargs)` identity.
    pending: HashMap<String, VecDeque<Box<TaskMessage>>>,
    discard_count: u64,
}

impl Blocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discard_count(&self) -> u64 {
        self.discard_count
    }

    pub fn count(&self) -> usize {
        self.pending.values().map(|q| q.len()).sum()
    }

    pub fn shutdown(&mut self) {
        if !self.pending.is_empty() {
            let dropped: usize = self.count();
            tracing::warn!(dropped, "pool shutting down with messages still held in the duplicate blocker");
        }
        self.pending.clear();
    }

    /// Decides the fate of an incoming message given whether a duplicate
    /// is currently running. Returns `Some(message)` if it should proceed
    /// immediately to the Queuer/dispatch step, `None` if it was queued
    /// internally or discarded.
    pub fn process_task(&mut self, message: Box<TaskMessage>, running_match: bool) -> Option<Box<TaskMessage>> {
        let key = message.duplicate_key();
        let queued_match = self.pending.get(&key).is_some_and(|q| !q.is_empty());

        match message.on_duplicate {
            OnDuplicate::Parallel => Some(message),
            OnDuplicate::Discard => {
                if running_match || queued_match {
                    self.discard_count += 1;
                    tracing::debug!(uuid = message.uuid_or_unknown(), "discarding duplicate task");
                    None
                } else {
                    Some(message)
                }
            }
            OnDuplicate::Serial => {
                // queued_match alone (no running predecessor) only arises
                // from the drain race, where a prior duplicate was popped
                // into the queue but hasn't been handed to a worker yet;
                // queuing behind it here keeps duplicates strictly ordered.
                if running_match || queued_match {
                    tracing::debug!(uuid = message.uuid_or_unknown(), "queuing duplicate task behind an in-flight or queued instance");
                    self.pending.entry(key).or_default().push_back(message);
                    None
                } else {
                    Some(message)
                }
            }
            OnDuplicate::QueueOne => {
                if queued_match {
                    self.discard_count += 1;
                    tracing::debug!(uuid = message.uuid_or_unknown(), "discarding duplicate task, one is already queued");
                    None
                } else if running_match {
                    self.pending.entry(key).or_default().push_back(message);
                    None
                } else {
                    Some(message)
                }
            }
        }
    }

    /// Given the set of `(task, args, kwargs)` identities currently
    /// running, releases the head of every pending FIFO whose identity is
    /// no longer running. The caller is responsible for handing each
    /// released message to the Queuer.
    pub fn pop_unblocked_messages(&mut self, running_keys: &HashSet<String>) -> Vec<Box<TaskMessage>> {
        let mut released = Vec::new();
        self.pending.retain(|key, queue| {
            if !running_keys.contains(key) {
                if let Some(msg) = queue.pop_front() {
                    released.push(msg);
                }
            }
            !queue.is_empty()
        });
        released
    }
}

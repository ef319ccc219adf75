//! The worker lifecycle finite-state machine.

/// A worker's lifecycle state. See `SPEC_FULL.md` §3 for the full
/// invariants; transitions are driven exclusively from
/// [`crate::worker::state::Worker`] and [`crate::pool::management`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Created in memory, subprocess not yet spawned.
    Initialized,
    /// `start()` called, subprocess spawn in flight.
    Spawned,
    /// Subprocess spawned, awaiting its `ready` callback.
    Starting,
    /// Ready to receive task requests.
    Ready,
    /// Stop has been signaled; awaiting the worker's own shutdown report.
    Stopping,
    /// Worker reported its shutdown event.
    Exited,
    /// Spawn failed, or the worker died unexpectedly, or it failed to
    /// exit cleanly after escalation.
    Error,
    /// Subprocess confirmed gone; record kept only for introspection
    /// until `worker_removal_wait` elapses.
    Retired,
}

impl WorkerStatus {
    /// Counts toward `min_workers`/`max_workers` capacity accounting.
    pub fn counts_for_capacity(self) -> bool {
        matches!(self, Self::Initialized | Self::Spawned | Self::Starting | Self::Ready)
    }

    /// No further callback or shutdown messages are expected from this
    /// worker; safe to consider it quiescent during pool shutdown.
    pub fn inactive(self) -> bool {
        matches!(self, Self::Exited | Self::Error | Self::Initialized)
    }

    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Spawned => "spawned",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Exited => "exited",
            Self::Error => "error",
            Self::Retired => "retired",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

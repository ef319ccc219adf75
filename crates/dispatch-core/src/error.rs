//! Central error type for the dispatch core.

pub type Result<T> = core::result::Result<T, Error>;

/// Errors representable as `Result` failures at API boundaries.
///
/// Most of the faults this crate deals with (worker death, timeout,
/// unresponsive exit) are not modeled as `Err` -- they are state
/// transitions observed via [`crate::worker::state::Worker`] and logged.
/// This enum only covers what actually needs to propagate to a caller.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to spawn worker subprocess: {0}")]
    ProcessSpawn(#[source] std::io::Error),

    #[error("internal channel closed unexpectedly: {context}")]
    ChannelClosed { context: String },

    #[error("pool is shutting down, not accepting new dispatches")]
    ServiceShuttingDown,

    #[error("invalid worker message: {reason}")]
    InvalidMessage { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

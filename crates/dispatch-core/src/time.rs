//! Single monotonic clock source.
//!
//! Every timeout and scale-down delta in this crate is computed from
//! [`tokio::time::Instant`]. Nothing here ever reads wall-clock time;
//! ordering across workers is not required, only "elapsed since."

pub use tokio::time::Instant;

pub fn now() -> Instant {
    Instant::now()
}

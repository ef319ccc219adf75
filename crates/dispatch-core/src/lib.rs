//! Core of an autoscaling subprocess worker pool: accepts task messages
//! from an outer producer layer, dispatches them to a fleet of worker
//! subprocesses under duplicate-suppression and capacity policy, and
//! manages that fleet's lifecycle (spawn, retire, force-kill) and size.
//!
//! Grounded throughout on `pool.py`'s `WorkerPool`; see `DESIGN.md` for
//! the per-module grounding ledger.

mod blocker;
mod config;
mod error;
mod event;
#[cfg(feature = "metrics")]
mod metrics;
mod message;
mod pool;
mod queue;
mod supervise;
mod time;
mod wakeup;
mod worker;

pub use crate::config::PoolConfig;
pub use crate::error::{Error, Result};
pub use crate::message::{OnDuplicate, TaskMessage, WorkerEvent, WorkerInbound};
pub use crate::pool::{Pool, PoolEvents};
pub use crate::supervise::FatalSignal;
pub use crate::worker::{WorkerSnapshot, WorkerStatus};

#[cfg(feature = "metrics")]
pub use crate::metrics::PoolMetrics;

//! Pool tuning parameters.
//!
//! Grounded on `pool.py`'s `WorkerPool.__init__` keyword arguments and
//! defaults; the binary crate's `CliArgs`/`ServerConfig` split
//! (`dispatch-server/src/config.rs`) is what actually parses these from
//! the environment, following `ferroid-tonic-server/src/server/config.rs`.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub scaledown_wait: Duration,
    pub scaledown_interval: Duration,
    pub worker_stop_wait: Duration,
    pub worker_removal_wait: Duration,
    pub shutdown_timeout: Duration,
    /// Path to the worker-side executor binary to spawn per worker.
    pub worker_command: PathBuf,
    /// Extra argv appended after `--worker-id <n>` on every spawn.
    pub worker_args: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            scaledown_wait: Duration::from_secs_f64(15.0),
            scaledown_interval: Duration::from_secs_f64(15.0),
            worker_stop_wait: Duration::from_secs_f64(30.0),
            worker_removal_wait: Duration::from_secs_f64(30.0),
            shutdown_timeout: Duration::from_secs(3),
            worker_command: PathBuf::from("dispatch-worker-demo"),
            worker_args: Vec::new(),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers < self.min_workers {
            return Err(Error::InvalidMessage {
                reason: format!("max_workers ({}) must be >= min_workers ({})", self.max_workers, self.min_workers),
            });
        }
        if self.min_workers == 0 && self.max_workers == 0 {
            return Err(Error::InvalidMessage { reason: "max_workers must be >= 1".to_string() });
        }
        Ok(())
    }
}

//! CLI/env configuration for the `dispatch-server` binary.
//!
//! Follows `ferroid-tonic-server/src/server/config.rs`'s split: a
//! `clap`-derived `CliArgs` parsed from argv/env/`.env`, converted via
//! `TryFrom` into the validated types the rest of the binary uses.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::Parser;
use dispatch_core::PoolConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "dispatch-server", version, about = "Host process for the dispatch-core autoscaling worker pool")]
pub struct CliArgs {
    /// Minimum number of worker subprocesses to keep running at all times.
    ///
    /// Environment variable: `MIN_WORKERS`
    #[arg(long, env = "MIN_WORKERS", default_value_t = 1)]
    pub min_workers: usize,

    /// Maximum number of worker subprocesses the pool may scale up to.
    ///
    /// Environment variable: `MAX_WORKERS`
    #[arg(long, env = "MAX_WORKERS", default_value_t = 4)]
    pub max_workers: usize,

    /// How long a busy-worker-count level must go unused before the pool
    /// considers scaling a worker back down, in seconds.
    ///
    /// Environment variable: `SCALEDOWN_WAIT`
    #[arg(long, env = "SCALEDOWN_WAIT", default_value_t = 15.0)]
    pub scaledown_wait: f64,

    /// How often the management loop re-evaluates scaling decisions absent
    /// any wakeup event, in seconds.
    ///
    /// Environment variable: `SCALEDOWN_INTERVAL`
    #[arg(long, env = "SCALEDOWN_INTERVAL", default_value_t = 15.0)]
    pub scaledown_interval: f64,

    /// How long to wait for a worker to report its own shutdown after
    /// being signaled to stop before escalating, in seconds.
    ///
    /// Environment variable: `WORKER_STOP_WAIT`
    #[arg(long, env = "WORKER_STOP_WAIT", default_value_t = 30.0)]
    pub worker_stop_wait: f64,

    /// How long a retired or errored worker record is kept around for
    /// introspection before being fully removed from the fleet, in
    /// seconds.
    ///
    /// Environment variable: `WORKER_REMOVAL_WAIT`
    #[arg(long, env = "WORKER_REMOVAL_WAIT", default_value_t = 30.0)]
    pub worker_removal_wait: f64,

    /// Maximum time to wait for the pool's internal tasks to wind down
    /// cleanly during shutdown before forcing, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3.0)]
    pub shutdown_timeout: f64,

    /// Path to the worker-side executor binary each worker subprocess
    /// forks. Defaults to the demo executor bundled with `dispatch-core`.
    ///
    /// Environment variable: `WORKER_COMMAND`
    #[arg(long, env = "WORKER_COMMAND", default_value = "dispatch-worker-demo")]
    pub worker_command: PathBuf,

    /// Extra argv appended after `--worker-id <n>` on every worker spawn.
    ///
    /// Environment variable: `WORKER_ARGS` (comma-separated)
    #[arg(long, env = "WORKER_ARGS", value_delimiter = ',')]
    pub worker_args: Vec<String>,

    /// `tracing-subscriber` `EnvFilter` directive for log verbosity.
    ///
    /// Environment variable: `LOG_FILTER`
    #[arg(long, env = "LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub pool: PoolConfig,
    pub log_filter: String,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_workers < args.min_workers {
            bail!("MAX_WORKERS ({}) must be >= MIN_WORKERS ({})", args.max_workers, args.min_workers);
        }

        let pool = PoolConfig {
            min_workers: args.min_workers,
            max_workers: args.max_workers,
            scaledown_wait: Duration::from_secs_f64(args.scaledown_wait),
            scaledown_interval: Duration::from_secs_f64(args.scaledown_interval),
            worker_stop_wait: Duration::from_secs_f64(args.worker_stop_wait),
            worker_removal_wait: Duration::from_secs_f64(args.worker_removal_wait),
            shutdown_timeout: Duration::from_secs_f64(args.shutdown_timeout),
            worker_command: args.worker_command,
            worker_args: args.worker_args,
        };
        pool.validate()?;

        Ok(Self { pool, log_filter: args.log_filter })
    }
}

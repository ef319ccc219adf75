//! The autoscaling worker pool: the crate's top-level assembly of every
//! other module. Grounded throughout on `pool.py`'s `WorkerPool` class;
//! see `DESIGN.md` for the per-operation grounding ledger.

pub mod dispatch;
pub mod management;
pub mod results;
pub mod shutdown;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::blocker::Blocker;
use crate::config::PoolConfig;
use crate::event::EventFlag;
use crate::queue::Queuer;
use crate::supervise::FatalSignal;
use crate::time::Instant;
use crate::wakeup::WakeupRunner;
use crate::worker::{OutboundReceiver, ProcessManager, Worker, WorkerSnapshot};

#[cfg(feature = "metrics")]
use crate::metrics::PoolMetrics;

/// Awaitable latches mirroring `pool.py`'s `PoolEvents`. Re-created fresh
/// by [`Pool::new`] the way the Python docstring notes benchmark fixtures
/// must re-create it per event loop.
#[derive(Default)]
pub struct PoolEvents {
    /// The capacity queue went from non-empty to empty.
    pub queue_cleared: EventFlag,
    /// Totally quiet: no blocked or queued messages, no busy workers.
    pub work_cleared: EventFlag,
    /// Kicker for the management loop; sparse-worker spawning is
    /// backgrounded, so callers set this instead of calling it directly.
    pub management_event: EventFlag,
    /// `min_workers` workers have all reported `ready`.
    pub workers_ready: EventFlag,
}

/// Everything mutated under the pool's single management lock: the
/// worker fleet, the capacity queue, the duplicate blocker, and the
/// counters and scale-down clock that are computed from them.
///
/// `SPEC_FULL.md` §5 sanctions exactly this: the "single scheduler"
/// invariant from the reference design is realized here as one
/// lock-serialized bundle rather than literal single-threadedness, which
/// lets the binary run a multi-threaded Tokio runtime for worker I/O
/// while preserving the spec's ordering guarantees.
pub(crate) struct Fleet {
    pub workers: HashMap<u64, Worker>,
    pub next_worker_id: u64,
    pub queuer: Queuer,
    pub blocker: Blocker,
    pub finished_count: u64,
    pub canceled_count: u64,
    /// `busy_worker_count -> last instant that count stopped being used`,
    /// `None` while currently at that level. See `SPEC_FULL.md` §9 for
    /// the open-question decision on how this is keyed and compared.
    pub last_used_by_ct: HashMap<usize, Option<Instant>>,
}

impl Fleet {
    fn new() -> Self {
        Self {
            workers: HashMap::new(),
            next_worker_id: 0,
            queuer: Queuer::new(),
            blocker: Blocker::new(),
            finished_count: 0,
            canceled_count: 0,
            last_used_by_ct: HashMap::new(),
        }
    }

    pub fn running_count(&self) -> usize {
        self.workers.values().filter(|w| w.current_task.is_some()).count()
    }

    pub fn available_count(&self) -> usize {
        self.workers.values().filter(|w| w.counts_for_capacity()).count()
    }

    /// Identities currently executing, for releasing `Blocker` FIFOs.
    pub fn running_keys(&self) -> std::collections::HashSet<String> {
        self.workers.values().filter_map(|w| w.current_task.as_ref()).map(|t| t.duplicate_key()).collect()
    }
}

struct PoolTasks {
    results: Option<tokio::task::JoinHandle<()>>,
    management: Option<tokio::task::JoinHandle<()>>,
    wakeup: Option<tokio::task::JoinHandle<()>>,
}

pub struct Pool {
    pub config: PoolConfig,
    pub(crate) process_manager: ProcessManager,
    pub(crate) state: Mutex<Fleet>,
    pub events: PoolEvents,
    pub(crate) shutting_down: AtomicBool,
    /// Set only once `shutdown()` has fully completed; distinct from
    /// `shutting_down`, which is set immediately and during which
    /// `dispatch` still accepts and queues messages per `SPEC_FULL.md`
    /// §4.5 step 3.
    pub(crate) torn_down: AtomicBool,
    pub(crate) wakeup_runner: Mutex<Option<WakeupRunner>>,
    pub(crate) fatal: Arc<FatalSignal>,
    tasks: Mutex<PoolTasks>,
    #[cfg(feature = "metrics")]
    pub metrics: PoolMetrics,
}

impl Pool {
    pub fn new(config: PoolConfig) -> (Arc<Self>, OutboundReceiver) {
        let (process_manager, outbound_rx) = ProcessManager::new(config.worker_command.clone(), config.worker_args.clone());
        let pool = Arc::new(Self {
            config,
            process_manager,
            state: Mutex::new(Fleet::new()),
            events: PoolEvents::default(),
            shutting_down: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            wakeup_runner: Mutex::new(None),
            fatal: FatalSignal::new(),
            tasks: Mutex::new(PoolTasks { results: None, management: None, wakeup: None }),
            #[cfg(feature = "metrics")]
            metrics: PoolMetrics::new(),
        });
        (pool, outbound_rx)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn fatal_signal(&self) -> Arc<FatalSignal> {
        self.fatal.clone()
    }

    /// Spawns the management, results, and wakeup-runner tasks. Takes
    /// ownership of `outbound_rx` (the counterpart of the sender the pool
    /// was constructed with) and a `forking_lock` shared with producer
    /// connection setup, exactly as `pool.py`'s `start_working` does.
    pub async fn start_working(self: &Arc<Self>, outbound_rx: OutboundReceiver, forking_lock: Arc<Mutex<()>>) {
        let results_pool = self.clone();
        let results_handle = crate::supervise::ensure_fatal("results_task", self.fatal.clone(), async move {
            results_pool.read_results_forever(outbound_rx).await;
        });

        let management_pool = self.clone();
        let management_handle = crate::supervise::ensure_fatal("management_task", self.fatal.clone(), async move {
            management_pool.manage_workers(forking_lock).await;
        });

        let wakeup_pool = self.clone();
        let wakeup_callback_pool = self.clone();
        let (wakeup_runner, wakeup_handle) = WakeupRunner::spawn(
            move || {
                let pool = wakeup_pool.clone();
                async move {
                    let state = pool.state.lock().await;
                    state.workers.values().filter_map(|w| w.next_wakeup().map(|at| (w.worker_id, at))).collect()
                }
            },
            move |worker_id| {
                let pool = wakeup_callback_pool.clone();
                async move { pool.cancel_worker(worker_id).await }
            },
        );

        *self.wakeup_runner.lock().await = Some(wakeup_runner);
        let mut tasks = self.tasks.lock().await;
        tasks.results = Some(results_handle);
        tasks.management = Some(management_handle);
        tasks.wakeup = Some(wakeup_handle);
    }

    pub async fn processed_count(&self) -> u64 {
        let state = self.state.lock().await;
        state.finished_count + state.canceled_count + state.blocker.discard_count()
    }

    pub async fn received_count(&self) -> u64 {
        let state = self.state.lock().await;
        let processed = state.finished_count + state.canceled_count + state.blocker.discard_count();
        processed + state.queuer.count() as u64 + state.blocker.count() as u64 + state.running_count() as u64
    }

    pub async fn finished_count(&self) -> u64 {
        self.state.lock().await.finished_count
    }

    pub async fn canceled_count(&self) -> u64 {
        self.state.lock().await.canceled_count
    }

    pub async fn discard_count(&self) -> u64 {
        self.state.lock().await.blocker.discard_count()
    }

    pub async fn queued_count(&self) -> usize {
        let state = self.state.lock().await;
        state.queuer.count() + state.blocker.count()
    }

    /// Snapshots every tracked worker for introspection / control-plane
    /// reporting. Mirrors the shape of `PoolWorker.get_data()`.
    pub async fn worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        let state = self.state.lock().await;
        state.workers.values().map(Worker::snapshot).collect()
    }

    /// Finds the worker currently running the given task uuid, if any;
    /// used by the out-of-scope control-plane layer's cancel-by-uuid.
    pub async fn find_worker_by_uuid(&self, uuid: &str) -> Option<u64> {
        let state = self.state.lock().await;
        state.workers.values().find(|w| w.current_task.as_deref().map(|t| t.uuid_or_unknown()) == Some(uuid)).map(|w| w.worker_id)
    }

    /// Delivers a cancellation signal to the worker currently running the
    /// given uuid, if one is found. Returns whether a worker was found.
    pub async fn cancel_by_uuid(&self, uuid: &str) -> bool {
        let mut state = self.state.lock().await;
        if let Some(worker) = state.workers.values_mut().find(|w| w.current_task.as_deref().map(|t| t.uuid_or_unknown()) == Some(uuid)) {
            worker.cancel();
            if let Some(runner) = self.wakeup_runner.lock().await.as_ref() {
                runner.kick();
            }
            true
        } else {
            false
        }
    }
}

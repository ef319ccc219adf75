//! End-to-end exercises of the pool against the bundled demo worker
//! subprocess. Each test name corresponds to a literal scenario in
//! `SPEC_FULL.md` §8.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{OnDuplicate, Pool, PoolConfig, TaskMessage, WorkerStatus};
use serde_json::json;
use tokio::sync::Mutex;

fn worker_command() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_dispatch-worker-demo"))
}

fn test_config(min_workers: usize, max_workers: usize) -> PoolConfig {
    PoolConfig {
        min_workers,
        max_workers,
        scaledown_wait: Duration::from_millis(100),
        scaledown_interval: Duration::from_millis(50),
        worker_stop_wait: Duration::from_millis(500),
        worker_removal_wait: Duration::from_millis(150),
        shutdown_timeout: Duration::from_secs(3),
        worker_command: worker_command(),
        worker_args: Vec::new(),
    }
}

async fn spawn_pool(config: PoolConfig) -> Arc<Pool> {
    let (pool, outbound_rx) = Pool::new(config);
    pool.start_working(outbound_rx, Arc::new(Mutex::new(()))).await;
    pool
}

fn msg(uuid: &str, task: &str, seconds: f64, timeout: Option<f64>, on_duplicate: OnDuplicate) -> TaskMessage {
    TaskMessage {
        uuid: uuid.to_string(),
        task: task.to_string(),
        args: json!({"seconds": seconds}),
        kwargs: json!({}),
        timeout,
        on_duplicate,
        delay: None,
    }
}

#[tokio::test]
async fn single_task_completes_and_clears_work() {
    let pool = spawn_pool(test_config(1, 1)).await;
    tokio::time::timeout(Duration::from_secs(2), pool.events.workers_ready.wait()).await.expect("pool should become ready");

    pool.dispatch(msg("A", "sleep", 0.05, Some(5.0), OnDuplicate::Parallel)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), pool.events.work_cleared.wait()).await.expect("work should clear once the task finishes");
    assert_eq!(pool.finished_count().await, 1);
    assert_eq!(pool.canceled_count().await, 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn backpressure_scales_up_and_drains_every_task() {
    let pool = spawn_pool(test_config(1, 4)).await;
    tokio::time::timeout(Duration::from_secs(2), pool.events.workers_ready.wait()).await.expect("pool should become ready");

    for i in 0..15 {
        pool.dispatch(msg(&format!("bp{i}"), "sleep", 0.1, None, OnDuplicate::Parallel)).await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(8), async {
        loop {
            if pool.finished_count().await == 15 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
    })
    .await
    .expect("all 15 tasks should finish");

    assert_eq!(pool.canceled_count().await, 0);
    let snapshots = pool.worker_snapshots().await;
    assert!(snapshots.len() <= 4, "pool should never exceed max_workers, saw {}", snapshots.len());

    pool.shutdown().await;
}

#[tokio::test]
async fn discard_policy_drops_every_duplicate_while_one_runs() {
    let pool = spawn_pool(test_config(1, 4)).await;
    tokio::time::timeout(Duration::from_secs(2), pool.events.workers_ready.wait()).await.expect("pool should become ready");

    for i in 0..10 {
        pool.dispatch(msg(&format!("disc{i}"), "sleep", 9.0, None, OnDuplicate::Discard)).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pool.finished_count().await, 0);
    assert_eq!(pool.discard_count().await, 9);
    let busy = pool.worker_snapshots().await.into_iter().filter(|w| w.current_task.is_some()).count();
    assert_eq!(busy, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn serial_policy_queues_every_duplicate_behind_the_running_one() {
    let pool = spawn_pool(test_config(1, 4)).await;
    tokio::time::timeout(Duration::from_secs(2), pool.events.workers_ready.wait()).await.expect("pool should become ready");

    for i in 0..10 {
        pool.dispatch(msg(&format!("ser{i}"), "sleep", 2.0, None, OnDuplicate::Serial)).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pool.finished_count().await, 0);
    assert_eq!(pool.discard_count().await, 0);
    assert_eq!(pool.queued_count().await, 9);
    let busy = pool.worker_snapshots().await.into_iter().filter(|w| w.current_task.is_some()).count();
    assert_eq!(busy, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn queue_one_policy_keeps_exactly_one_waiting_and_discards_the_rest() {
    let pool = spawn_pool(test_config(1, 4)).await;
    tokio::time::timeout(Duration::from_secs(2), pool.events.workers_ready.wait()).await.expect("pool should become ready");

    for i in 0..10 {
        pool.dispatch(msg(&format!("qo{i}"), "sleep", 2.0, None, OnDuplicate::QueueOne)).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pool.queued_count().await, 1);
    assert_eq!(pool.discard_count().await, 8);
    let busy = pool.worker_snapshots().await.into_iter().filter(|w| w.current_task.is_some()).count();
    assert_eq!(busy, 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn timeout_cancels_the_task_without_counting_it_as_finished() {
    let pool = spawn_pool(test_config(1, 1)).await;
    tokio::time::timeout(Duration::from_secs(2), pool.events.workers_ready.wait()).await.expect("pool should become ready");

    pool.dispatch(msg("timeout-1", "sleep-10", 10.0, Some(0.2), OnDuplicate::Parallel)).await.unwrap();

    tokio::time::timeout(Duration::from_millis(1500), async {
        loop {
            if pool.canceled_count().await == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
    })
    .await
    .expect("task should be canceled shortly after its timeout elapses");

    assert_eq!(pool.finished_count().await, 0);

    pool.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn unexpected_worker_death_is_detected_and_the_pool_recovers() {
    let pool = spawn_pool(test_config(1, 1)).await;
    tokio::time::timeout(Duration::from_secs(2), pool.events.workers_ready.wait()).await.expect("pool should become ready");

    pool.dispatch(msg("X", "sleep", 5.0, None, OnDuplicate::Parallel)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pid = pool.worker_snapshots().await.into_iter().find_map(|w| w.pid).expect("the busy worker should have a pid by now");

    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).expect("should be able to signal our own child");

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if pool.canceled_count().await == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
    })
    .await
    .expect("the dead worker's task should be counted as canceled");

    // The pool should reap the dead worker and scale back up to min_workers.
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let snapshots = pool.worker_snapshots().await;
            if snapshots.len() == 1 && snapshots[0].status == WorkerStatus::Ready {
                return;
            }
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
    })
    .await
    .expect("pool should scale back up to min_workers with a fresh worker");

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let pool = spawn_pool(test_config(1, 1)).await;
    tokio::time::timeout(Duration::from_secs(2), pool.events.workers_ready.wait()).await.expect("pool should become ready");

    pool.shutdown().await;
    pool.shutdown().await;

    assert_eq!(pool.finished_count().await, 0);
}

#[tokio::test]
async fn received_count_accounts_for_every_accepted_message() {
    let pool = spawn_pool(test_config(1, 2)).await;
    tokio::time::timeout(Duration::from_secs(2), pool.events.workers_ready.wait()).await.expect("pool should become ready");

    // One runs, nine pile up behind it under `serial`, preserving the
    // invariant `received == finished + canceled + discard + queued + blocked + busy`.
    for i in 0..10 {
        pool.dispatch(msg(&format!("inv{i}"), "sleep", 0.3, None, OnDuplicate::Serial)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.received_count().await, 10);

    tokio::time::timeout(Duration::from_secs(8), async {
        loop {
            if pool.finished_count().await == 10 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
    })
    .await
    .expect("every serialized duplicate should eventually finish");

    assert_eq!(pool.received_count().await, 10);
    assert_eq!(pool.processed_count().await, 10);

    pool.shutdown().await;
}

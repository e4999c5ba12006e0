//! Test suite for the run saver and the bundled stores.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Semaphore;

use spindle::{
    BridgeRegistry, MemoryStore, PipelineConfig, Run, RunArchive, RunSaver, RunState, RunStore,
    Runner, StoreError, TaskGraph, Vars,
};

fn finished_run(job_name: &str) -> Run {
    let _ = tracing_subscriber::fmt::try_init();
    let now = Utc::now();
    Run {
        id: 0,
        job_name: job_name.to_string(),
        state: RunState::Completed,
        inputs: Vars::new(),
        task_runs: Vec::new(),
        outputs: vec![Some(json!(42.0))],
        created_at: now,
        finished_at: Some(now),
    }
}

/// Store whose inserts block until a permit is released, to observe queue
/// behavior deterministically.
struct GatedStore {
    gate: Semaphore,
    entered: AtomicU32,
    inner: MemoryStore,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            entered: AtomicU32::new(0),
            inner: MemoryStore::new(),
        }
    }

    /// Waits until the saver worker has entered `count` inserts.
    async fn wait_for_entered(&self, count: u32) {
        for _ in 0..500 {
            if self.entered.load(Ordering::SeqCst) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("saver worker never reached insert #{count}");
    }
}

#[async_trait]
impl RunStore for GatedStore {
    async fn insert_finished_run(&self, run: &Run) -> Result<i64, StoreError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await.unwrap().forget();
        self.inner.insert_finished_run(run).await
    }
}

/// Store that fails a configured number of times before succeeding.
struct FlakyStore {
    failures: u32,
    attempts: AtomicU32,
    inner: MemoryStore,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
            inner: MemoryStore::new(),
        }
    }
}

#[async_trait]
impl RunStore for FlakyStore {
    async fn insert_finished_run(&self, run: &Run) -> Result<i64, StoreError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        self.inner.insert_finished_run(run).await
    }
}

#[tokio::test]
async fn runs_persist_in_submission_order() {
    let store = Arc::new(MemoryStore::new());
    let saver = RunSaver::spawn(store.clone(), 100, 3);

    for i in 0..100 {
        saver.save(finished_run(&format!("job_{i}"))).await.unwrap();
    }
    saver.close().await;

    let stored = store.runs().await;
    assert_eq!(stored.len(), 100);
    for (i, run) in stored.iter().enumerate() {
        assert_eq!(run.job_name, format!("job_{i}"));
        assert_eq!(run.id, i as i64 + 1, "ids are assigned in order");
    }
}

#[tokio::test]
async fn full_queue_blocks_submission_until_consumer_advances() {
    let store = Arc::new(GatedStore::new());
    let saver = RunSaver::spawn(store.clone(), 2, 1);

    // Worker takes the first run and blocks inside the store; the next two
    // fill the queue.
    saver.save(finished_run("r1")).await.unwrap();
    store.wait_for_entered(1).await;
    saver.save(finished_run("r2")).await.unwrap();
    saver.save(finished_run("r3")).await.unwrap();

    // Queue full: the fourth submission must pend.
    let blocked = tokio::time::timeout(Duration::from_millis(100), saver.save(finished_run("r4"))).await;
    assert!(blocked.is_err(), "submission should block while the queue is full");

    // Let the worker finish one insert; a slot frees up.
    store.gate.add_permits(1);
    tokio::time::timeout(Duration::from_secs(1), saver.save(finished_run("r4")))
        .await
        .expect("submission should proceed once the consumer advances")
        .unwrap();

    store.gate.add_permits(100);
    saver.close().await;
    assert_eq!(store.inner.len().await, 4);
}

#[tokio::test]
async fn close_drains_everything_queued() {
    let store = Arc::new(GatedStore::new());
    let saver = RunSaver::spawn(store.clone(), 10, 1);

    for i in 0..5 {
        saver.save(finished_run(&format!("queued_{i}"))).await.unwrap();
    }
    assert_eq!(store.inner.len().await, 0, "nothing persisted while gated");

    store.gate.add_permits(100);
    saver.close().await;
    assert_eq!(store.inner.len().await, 5, "close must drain the queue");
}

#[tokio::test]
async fn persistence_failures_are_retried() {
    let store = Arc::new(FlakyStore::new(2));
    let saver = RunSaver::spawn(store.clone(), 10, 3);

    saver.save(finished_run("retry_me")).await.unwrap();
    saver.close().await;

    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.inner.len().await, 1);
}

#[tokio::test]
async fn exhausted_retries_do_not_kill_the_worker() {
    let store = Arc::new(FlakyStore::new(u32::MAX));
    let saver = RunSaver::spawn(store.clone(), 10, 2);

    saver.save(finished_run("doomed_1")).await.unwrap();
    saver.save(finished_run("doomed_2")).await.unwrap();
    saver.close().await;

    // Both runs were attempted to exhaustion; neither killed the worker.
    assert_eq!(store.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(store.inner.len().await, 0);
}

#[tokio::test]
async fn runner_returns_before_persistence_and_saver_catches_up() {
    let graph = TaskGraph::compile(
        "save_me",
        r#"scale [type=multiply input="$(inputs.v)" times=2];"#,
        &BridgeRegistry::new(),
    )
    .unwrap();

    let store = Arc::new(MemoryStore::new());
    let runner = Runner::new(
        PipelineConfig::default(),
        Arc::new(BridgeRegistry::new()),
        store.clone(),
    )
    .unwrap();

    let vars = Vars::from_value(json!({"v": 21})).unwrap();
    let run = runner.execute_and_save(&graph, vars).await.unwrap();

    // The caller's copy has no durable id yet.
    assert_eq!(run.id, 0);
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.outputs[0].as_ref().unwrap().as_f64().unwrap(), 42.0);

    // Draining the saver makes the run durable, with its assigned id.
    runner.close().await;
    let stored = store.runs().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, 1);
    assert_eq!(stored[0].job_name, "save_me");
    assert_eq!(stored[0].task_runs.len(), 1);
}

#[tokio::test]
async fn archive_assigns_monotonic_ids_and_prunes() {
    let dir = tempfile::tempdir().unwrap();
    let archive = RunArchive::open(dir.path().join("runs_db"), Some(3)).unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        let id = archive
            .insert_finished_run(&finished_run(&format!("archived_{i}")))
            .await
            .unwrap();
        ids.push(id);
    }

    assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids are monotonic: {ids:?}");
    assert_eq!(archive.len(), 3, "history is pruned oldest-first");

    let last = archive.load(*ids.last().unwrap()).unwrap().unwrap();
    assert_eq!(last.job_name, "archived_4");
    assert_eq!(last.id, *ids.last().unwrap());
    assert_eq!(last.outputs, vec![Some(json!(42.0))]);

    let pruned = archive.load(ids[0]).unwrap();
    assert!(pruned.is_none(), "oldest runs are gone after pruning");
}

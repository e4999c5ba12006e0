//! Asynchronous run persistence.
//!
//! The saver decouples execution latency from storage latency: finished
//! runs go onto a bounded queue and a single worker writes them out in
//! submission order. A full queue blocks the submitter rather than dropping
//! a run, so queue depth is the operational signal to watch when storage
//! lags.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::errors::SaverError;
use crate::pipeline::run::Run;
use crate::pipeline::runner::RunStore;

/// Channel-fed persistence worker for finished runs.
pub struct RunSaver {
    tx: mpsc::Sender<Run>,
    worker: JoinHandle<()>,
}

impl RunSaver {
    /// Starts the worker. `queue_depth` bounds the submission queue;
    /// `max_attempts` bounds persistence retries per run.
    pub fn spawn(store: Arc<dyn RunStore>, queue_depth: usize, max_attempts: u32) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth);
        let worker = tokio::spawn(worker_loop(rx, store, max_attempts));
        Self { tx, worker }
    }

    /// Submits a finished run for persistence. Returns as soon as the run
    /// is queued; blocks while the queue is full.
    pub async fn save(&self, run: Run) -> Result<(), SaverError> {
        self.tx.send(run).await.map_err(|_| SaverError::Closed)
    }

    /// Stops accepting submissions, drains and persists everything already
    /// queued, then returns.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(error = %e, "run saver worker did not shut down cleanly");
        }
    }
}

async fn worker_loop(mut rx: mpsc::Receiver<Run>, store: Arc<dyn RunStore>, max_attempts: u32) {
    info!("run saver started");
    while let Some(run) = rx.recv().await {
        persist(store.as_ref(), run, max_attempts).await;
    }
    info!("run saver drained and stopped");
}

/// Writes one run, retrying with backoff. Exhausted retries raise an
/// operational alert; the run's content is never mutated or dropped
/// silently.
async fn persist(store: &dyn RunStore, run: Run, max_attempts: u32) {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.insert_finished_run(&run).await {
            Ok(id) => {
                debug!(run_id = id, job = %run.job_name, "persisted finished run");
                return;
            }
            Err(e) if attempt < max_attempts => {
                let delay = retry_delay(attempt);
                warn!(
                    error = %e,
                    job = %run.job_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "failed to persist run, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    job = %run.job_name,
                    attempts = attempt,
                    "giving up persisting run; operator attention required"
                );
                return;
            }
        }
    }
}

/// Exponential backoff with jitter, capped at two seconds.
fn retry_delay(attempt: u32) -> Duration {
    let base = Duration::from_millis(50).saturating_mul(1 << attempt.min(5));
    let jitter = Duration::from_millis(fastrand::u64(0..50));
    (base + jitter).min(Duration::from_secs(2))
}

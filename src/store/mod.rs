//! Bundled [`RunStore`](crate::pipeline::runner::RunStore) implementations.

pub mod archive;

pub use archive::RunArchive;

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::errors::StoreError;
use crate::pipeline::run::Run;
use crate::pipeline::runner::RunStore;

/// In-memory store with monotonically assigned ids. Intended for tests and
/// local experimentation.
#[derive(Debug)]
pub struct MemoryStore {
    runs: Mutex<Vec<Run>>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Snapshot of everything stored so far, in insertion order.
    pub async fn runs(&self) -> Vec<Run> {
        self.runs.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert_finished_run(&self, run: &Run) -> Result<i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut stored = run.clone();
        stored.id = id;
        self.runs.lock().await.push(stored);
        Ok(id)
    }
}

//! Embedded run archive.
//!
//! A sled-backed [`RunStore`] keeping a bounded history of finished runs.
//! Values are zstd-compressed JSON documents keyed by the database-assigned
//! id in big-endian order, so iteration and pruning follow insertion order.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::core::errors::StoreError;
use crate::pipeline::run::Run;
use crate::pipeline::runner::RunStore;

const COMPRESSION_LEVEL: i32 = 3;

pub struct RunArchive {
    db: sled::Db,
    runs: sled::Tree,
    max_saved_runs: Option<u64>,
}

impl RunArchive {
    /// Opens (or creates) an archive at `path`. `max_saved_runs` bounds the
    /// retained history; oldest runs are pruned past it.
    pub fn open(path: impl AsRef<Path>, max_saved_runs: Option<u64>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::database("open archive", e))?;
        let runs = db
            .open_tree("runs")
            .map_err(|e| StoreError::database("open runs tree", e))?;
        Ok(Self {
            db,
            runs,
            max_saved_runs,
        })
    }

    /// Loads one archived run by id.
    pub fn load(&self, id: i64) -> Result<Option<Run>, StoreError> {
        let key = (id as u64).to_be_bytes();
        let Some(compressed) = self
            .runs
            .get(key)
            .map_err(|e| StoreError::database("load run", e))?
        else {
            return Ok(None);
        };
        let encoded = zstd::decode_all(&compressed[..])
            .map_err(|e| StoreError::database("decompress run", e))?;
        let run = serde_json::from_slice(&encoded)?;
        Ok(Some(run))
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn prune(&self) -> Result<(), StoreError> {
        let Some(max) = self.max_saved_runs else {
            return Ok(());
        };
        while self.runs.len() as u64 > max {
            let removed = self
                .runs
                .pop_min()
                .map_err(|e| StoreError::database("prune archive", e))?;
            if removed.is_none() {
                break;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RunStore for RunArchive {
    async fn insert_finished_run(&self, run: &Run) -> Result<i64, StoreError> {
        let id = self
            .db
            .generate_id()
            .map_err(|e| StoreError::database("assign run id", e))? as i64;
        let mut stored = run.clone();
        stored.id = id;

        let encoded = serde_json::to_vec(&stored)?;
        let compressed = zstd::encode_all(&encoded[..], COMPRESSION_LEVEL)
            .map_err(|e| StoreError::database("compress run", e))?;

        self.runs
            .insert((id as u64).to_be_bytes(), compressed)
            .map_err(|e| StoreError::database("insert run", e))?;
        self.db
            .flush_async()
            .await
            .map_err(|e| StoreError::database("flush archive", e))?;
        self.prune()?;

        debug!(run_id = id, job = %stored.job_name, "archived finished run");
        Ok(id)
    }
}

//! Spindle - a job pipeline execution engine for oracle nodes.
//!
//! A job is a directed acyclic graph of heterogeneous tasks (HTTP fetches,
//! bridge calls, JSON extraction, arithmetic transforms, statistical
//! aggregation) compiled once from a small graph language and executed on
//! every trigger. The executor dispatches ready tasks concurrently under
//! per-task deadlines, tolerates partial failure, and hands finished runs
//! to an asynchronous saver so triggers never block on storage.
//!
//! ```no_run
//! use std::sync::Arc;
//! use spindle::{BridgeRegistry, JobSpec, MemoryStore, PipelineConfig, Runner, Vars};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let bridges = Arc::new(BridgeRegistry::new());
//! let spec = JobSpec::from_yaml_file("jobs/eth_usd_median.yaml")?;
//! let graph = spec.compile(&bridges)?;
//!
//! let runner = Runner::new(PipelineConfig::default(), bridges, Arc::new(MemoryStore::new()))?;
//! let run = runner.execute_and_save(&graph, Vars::new()).await?;
//! println!("outputs: {:?}", run.outputs);
//! # Ok(())
//! # }
//! ```

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
}

pub mod pipeline;
pub mod store;

// Re-exports for convenience
pub use crate::core::config::{ConfigOverrides, PipelineConfig};
pub use crate::core::errors::{
    ConfigError, SaverError, SpecError, StoreError, TaskError, TaskErrorKind,
};
pub use pipeline::{
    BridgeRegistry, Executor, JobSpec, Run, RunSaver, RunState, RunStore, Runner, Task, TaskGraph,
    TaskRun, TaskStatus, Vars,
};
pub use store::{MemoryStore, RunArchive};

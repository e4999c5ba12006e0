//! The runner façade: the single entry point triggers call.
//!
//! A trigger (new block, cron tick, administrative request) hands a
//! compiled graph and its input variables to [`Runner::execute_and_save`];
//! execution happens synchronously, persistence happens asynchronously via
//! the run saver, and the finished in-memory run comes back immediately.

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::config::PipelineConfig;
use crate::core::errors::{ConfigError, SaverError, StoreError};
use crate::pipeline::bridge::BridgeRegistry;
use crate::pipeline::executor::Executor;
use crate::pipeline::graph::TaskGraph;
use crate::pipeline::run::{Run, Vars};
use crate::pipeline::saver::RunSaver;
use crate::pipeline::task::ExecEnv;

/// The persistence collaborator the run saver writes through.
///
/// Implementations are expected to be transactional per run and are only
/// ever called by the saver's single worker, so they never see concurrent
/// duplicate submissions of the same run instance.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Inserts a finished run and returns its assigned id.
    async fn insert_finished_run(&self, run: &Run) -> Result<i64, StoreError>;
}

/// Composes task graphs, the executor, and the run saver.
pub struct Runner {
    executor: Executor,
    saver: RunSaver,
    store: Arc<dyn RunStore>,
}

impl Runner {
    pub fn new(
        config: PipelineConfig,
        bridges: Arc<BridgeRegistry>,
        store: Arc<dyn RunStore>,
    ) -> Result<Self, ConfigError> {
        let env = Arc::new(ExecEnv::new(config, bridges)?);
        let saver = RunSaver::spawn(
            store.clone(),
            env.config.saver_queue_depth,
            env.config.saver_max_attempts,
        );
        Ok(Self {
            executor: Executor::new(env),
            saver,
            store,
        })
    }

    /// Executes one run synchronously without persisting it.
    pub async fn execute_run(&self, graph: &TaskGraph, vars: Vars) -> Run {
        self.executor.execute(graph, vars).await
    }

    /// Executes one run, queues it for durable persistence, and returns the
    /// in-memory result without waiting for storage. The returned run has
    /// no durable id yet.
    pub async fn execute_and_save(&self, graph: &TaskGraph, vars: Vars) -> Result<Run, SaverError> {
        let run = self.executor.execute(graph, vars).await;
        self.saver.save(run.clone()).await?;
        Ok(run)
    }

    /// The persistence seam itself, for callers that manage their own runs.
    pub async fn insert_finished_run(&self, run: &Run) -> Result<i64, StoreError> {
        self.store.insert_finished_run(run).await
    }

    /// Stops the saver after draining queued runs.
    pub async fn close(self) {
        self.saver.close().await;
    }
}

//! The job pipeline: graph model, execution, and persistence.

pub mod bridge;
pub mod executor;
pub mod graph;
pub mod http;
pub mod job;
pub mod json;
pub mod math;
pub mod parser;
pub mod run;
pub mod runner;
pub mod saver;
pub mod stats;
pub mod task;
pub mod template;

pub use bridge::{BridgeRegistry, BridgeTask};
pub use executor::Executor;
pub use graph::{DepKind, Task, TaskGraph};
pub use http::HttpTask;
pub use job::JobSpec;
pub use json::JsonParseTask;
pub use math::{DivideTask, MultiplyTask};
pub use run::{Run, RunState, TaskRun, TaskStatus, Vars};
pub use runner::{RunStore, Runner};
pub use saver::RunSaver;
pub use stats::{MeanTask, MedianTask};
pub use task::{ExecEnv, TaskBehavior, TaskContext, TaskInput, TaskKind};
pub use template::{Reference, ResolveCtx, Template};

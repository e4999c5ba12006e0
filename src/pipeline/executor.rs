//! The pipeline executor: runs one task graph instance to completion.
//!
//! Scheduling walks the graph by in-degree: tasks with no unfinished
//! upstreams dispatch concurrently onto the shared semaphore-bounded pool,
//! each under its own deadline. A finished task decrements its dependents'
//! counts; a required upstream that did not succeed dooms the dependent to
//! `Skipped` instead of making it ready. Failures never touch sibling
//! branches. The whole run is additionally bounded by a wall-clock deadline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::core::errors::TaskError;
use crate::pipeline::graph::{DepKind, TaskGraph};
use crate::pipeline::run::{Run, RunState, TaskRun, TaskStatus, Vars};
use crate::pipeline::task::{ExecEnv, TaskBehavior, TaskContext, TaskInput};
use crate::pipeline::template::ResolveCtx;

/// Executes runs against a shared environment. Cheap to share; all per-run
/// state lives on the stack of [`Executor::execute`], so any number of runs
/// may execute concurrently.
pub struct Executor {
    env: Arc<ExecEnv>,
    semaphore: Arc<Semaphore>,
}

struct TaskFinish {
    node: NodeIndex,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    result: Result<Value, TaskError>,
}

impl Executor {
    pub fn new(env: Arc<ExecEnv>) -> Self {
        let semaphore = Arc::new(Semaphore::new(env.config.max_parallel_tasks));
        Self { env, semaphore }
    }

    pub fn env(&self) -> &Arc<ExecEnv> {
        &self.env
    }

    /// Runs the graph once with the given trigger variables, producing a
    /// finished [`Run`].
    pub async fn execute(&self, graph: &TaskGraph, vars: Vars) -> Run {
        let created_at = Utc::now();
        let deadline = Instant::now() + self.env.config.max_run_duration;
        let run_inputs = vars.clone();

        info!(job = graph.name(), tasks = graph.len(), "starting pipeline run");

        let mut driver = Driver::new(graph, self.env.clone(), self.semaphore.clone(), vars);
        driver.seed();

        let mut timed_out = false;
        while driver.finalized < graph.len() {
            if driver.in_flight.is_empty() {
                // A validated DAG always has work in flight while tasks
                // remain; bail out rather than spin.
                warn!(job = graph.name(), "scheduler stalled with no tasks in flight");
                break;
            }
            tokio::select! {
                maybe = driver.in_flight.next() => {
                    if let Some(finish) = maybe {
                        driver.on_finish(finish);
                    }
                }
                _ = sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            warn!(
                job = graph.name(),
                max_run_duration = ?self.env.config.max_run_duration,
                "run deadline elapsed, cancelling remaining tasks"
            );
        }
        driver.into_run(graph, run_inputs, created_at, timed_out)
    }
}

/// Per-run scheduling state. Vectors are indexed by `NodeIndex::index()`.
struct Driver<'g> {
    graph: &'g TaskGraph,
    env: Arc<ExecEnv>,
    semaphore: Arc<Semaphore>,
    vars: Arc<Vars>,
    /// Unfinished upstream count per task, over all edges.
    remaining: Vec<usize>,
    /// First required upstream that did not succeed, if any.
    doomed: Vec<Option<String>>,
    /// Successful outputs, consumed by dependents.
    outputs: Vec<Option<Value>>,
    records: Vec<Option<TaskRun>>,
    finalized: usize,
    in_flight: FuturesUnordered<BoxFuture<'static, TaskFinish>>,
}

impl<'g> Driver<'g> {
    fn new(graph: &'g TaskGraph, env: Arc<ExecEnv>, semaphore: Arc<Semaphore>, vars: Vars) -> Self {
        let n = graph.len();
        let remaining = graph
            .inner()
            .node_indices()
            .map(|node| {
                graph
                    .inner()
                    .edges_directed(node, Direction::Incoming)
                    .count()
            })
            .collect();
        Self {
            graph,
            env,
            semaphore,
            vars: Arc::new(vars),
            remaining,
            doomed: vec![None; n],
            outputs: vec![None; n],
            records: vec![None; n],
            finalized: 0,
            in_flight: FuturesUnordered::new(),
        }
    }

    /// Dispatches every task with no upstream dependencies, in topological
    /// order for determinism.
    fn seed(&mut self) {
        let sources: Vec<NodeIndex> = self
            .graph
            .topo()
            .iter()
            .copied()
            .filter(|&node| self.remaining[node.index()] == 0)
            .collect();
        for node in sources {
            self.dispatch(node);
        }
    }

    fn dispatch(&mut self, node: NodeIndex) {
        let task = self.graph.node_task(node).clone();
        let inputs: Vec<TaskInput> = self
            .graph
            .fan_in(node)
            .iter()
            .map(|&upstream| TaskInput {
                source: self.graph.node_task(upstream).id.clone(),
                value: self.outputs[upstream.index()].clone(),
            })
            .collect();
        let upstream: HashMap<String, Value> = inputs
            .iter()
            .filter_map(|input| input.value.clone().map(|v| (input.source.clone(), v)))
            .collect();

        let task_timeout = task.timeout.unwrap_or(self.env.config.default_task_timeout);
        let env = self.env.clone();
        let semaphore = self.semaphore.clone();
        let vars = self.vars.clone();

        debug!(
            task_id = %task.id,
            task_type = task.kind.type_name(),
            inputs = inputs.len(),
            "dispatching task"
        );

        self.in_flight.push(
            async move {
                let permit = semaphore.acquire_owned().await;
                let started_at = Utc::now();
                let result = match permit {
                    Ok(_permit) => {
                        let ctx = TaskContext {
                            task_id: &task.id,
                            inputs: &inputs,
                            env: &env,
                            refs: ResolveCtx {
                                vars: &vars,
                                upstream: &upstream,
                            },
                        };
                        match timeout(task_timeout, task.kind.resolve(&ctx)).await {
                            Ok(result) => result,
                            Err(_) => Err(TaskError::timeout(format!(
                                "deadline of {:?} elapsed",
                                task_timeout
                            ))),
                        }
                    }
                    Err(_) => Err(TaskError::external_call("scheduler shut down")),
                };
                TaskFinish {
                    node,
                    started_at,
                    finished_at: Utc::now(),
                    result,
                }
            }
            .boxed(),
        );
    }

    fn on_finish(&mut self, finish: TaskFinish) {
        let task = self.graph.node_task(finish.node);
        let (status, output, error) = match finish.result {
            Ok(value) => (TaskStatus::Succeeded, Some(value), None),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "task failed");
                (TaskStatus::Failed, None, Some(e))
            }
        };
        self.outputs[finish.node.index()] = output.clone();
        let record = TaskRun {
            task_id: task.id.clone(),
            task_type: task.kind.type_name().to_string(),
            status,
            output,
            error,
            started_at: Some(finish.started_at),
            finished_at: Some(finish.finished_at),
            index: task.index,
        };
        self.finalize(finish.node, record);
    }

    fn finalize(&mut self, node: NodeIndex, record: TaskRun) {
        let succeeded = record.status == TaskStatus::Succeeded;
        self.records[node.index()] = Some(record);
        self.finalized += 1;
        self.cascade(node, succeeded);
    }

    /// Propagates one finished task to its dependents, dispatching or
    /// skipping any that became ready.
    fn cascade(&mut self, node: NodeIndex, succeeded: bool) {
        let dependents: Vec<(NodeIndex, DepKind)> = self
            .graph
            .inner()
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| (edge.target(), *edge.weight()))
            .collect();

        for (dependent, dep_kind) in dependents {
            if !succeeded && dep_kind == DepKind::Required && self.doomed[dependent.index()].is_none()
            {
                self.doomed[dependent.index()] = Some(self.graph.node_task(node).id.clone());
            }
            self.remaining[dependent.index()] -= 1;
            if self.remaining[dependent.index()] == 0 {
                match self.doomed[dependent.index()].clone() {
                    Some(upstream_id) => self.skip(dependent, &upstream_id),
                    None => self.dispatch(dependent),
                }
            }
        }
    }

    /// Records a dependency-failure skip without executing the task.
    fn skip(&mut self, node: NodeIndex, upstream_id: &str) {
        let task = self.graph.node_task(node);
        debug!(
            task_id = %task.id,
            upstream = upstream_id,
            "skipping task, required dependency did not succeed"
        );
        let record = TaskRun {
            task_id: task.id.clone(),
            task_type: task.kind.type_name().to_string(),
            status: TaskStatus::Skipped,
            output: None,
            error: Some(TaskError::dependency_failed(format!(
                "required upstream task '{}' did not succeed",
                upstream_id
            ))),
            started_at: None,
            finished_at: None,
            index: task.index,
        };
        self.finalize(node, record);
    }

    /// Assembles the finished run. Tasks still unfinished after a run
    /// deadline are recorded as timed out so every task keeps a record.
    fn into_run(
        mut self,
        graph: &TaskGraph,
        inputs: Vars,
        created_at: DateTime<Utc>,
        timed_out: bool,
    ) -> Run {
        // Cancel whatever is still in flight before finalizing records.
        self.in_flight.clear();

        for node in graph.inner().node_indices() {
            if self.records[node.index()].is_none() {
                let task = graph.node_task(node);
                self.records[node.index()] = Some(TaskRun {
                    task_id: task.id.clone(),
                    task_type: task.kind.type_name().to_string(),
                    status: TaskStatus::Failed,
                    output: None,
                    error: Some(TaskError::timeout("run deadline elapsed")),
                    started_at: None,
                    finished_at: None,
                    index: task.index,
                });
            }
        }

        let outputs: Vec<Option<Value>> = graph
            .terminals()
            .iter()
            .map(|&terminal| self.outputs[terminal.index()].clone())
            .collect();

        let all_terminals_succeeded = graph.terminals().iter().all(|&terminal| {
            self.records[terminal.index()]
                .as_ref()
                .map(|record| record.succeeded())
                .unwrap_or(false)
        });
        let state = if timed_out || !all_terminals_succeeded {
            RunState::Errored
        } else {
            RunState::Completed
        };

        let task_runs: Vec<TaskRun> = self.records.into_iter().flatten().collect();
        let finished_at = Utc::now();
        info!(
            job = graph.name(),
            state = ?state,
            elapsed_ms = (finished_at - created_at).num_milliseconds(),
            "pipeline run finished"
        );

        Run {
            id: 0,
            job_name: graph.name().to_string(),
            state,
            inputs,
            task_runs,
            outputs,
            created_at,
            finished_at: Some(finished_at),
        }
    }
}

//! Task graph compilation and structural validation.
//!
//! A [`TaskGraph`] is compiled once per job specification and reused,
//! read-only, across every run of that job. All structural problems (cycles,
//! unknown types, dangling references) are rejected here so they can never
//! surface during execution.

use std::collections::HashMap;
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::core::errors::SpecError;
use crate::pipeline::bridge::BridgeRegistry;
use crate::pipeline::parser;
use crate::pipeline::task::{Attrs, TaskKind};

/// Whether a downstream task needs its upstream's success to proceed, or
/// merely its completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    Required,
    Optional,
}

/// One compiled task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    /// Override of the engine-wide default task deadline.
    pub timeout: Option<Duration>,
    /// Static fan-in position among sibling producers.
    pub index: u32,
    pub line: usize,
}

/// An immutable, validated DAG of tasks. Owns no mutable state and is safe
/// to share across unlimited simultaneous runs.
#[derive(Debug)]
pub struct TaskGraph {
    name: String,
    graph: DiGraph<Task, DepKind>,
    topo: Vec<NodeIndex>,
    /// Tasks with no outgoing edges, in declaration order; their outputs
    /// become the run's outputs.
    terminals: Vec<NodeIndex>,
    /// Per node: direct upstreams ordered by (upstream index attribute,
    /// declaration order). Precomputed so execution never sorts.
    fan_in: Vec<Vec<NodeIndex>>,
}

impl TaskGraph {
    /// Compiles a specification into a validated graph.
    pub fn compile(
        name: &str,
        source: &str,
        bridges: &BridgeRegistry,
    ) -> Result<Self, SpecError> {
        let parsed = parser::parse(source)?;
        if parsed.tasks.is_empty() {
            return Err(SpecError::EmptyGraph);
        }

        let mut graph = DiGraph::new();
        let mut by_id: HashMap<String, NodeIndex> = HashMap::new();

        for decl in &parsed.tasks {
            if by_id.contains_key(&decl.id) {
                return Err(SpecError::DuplicateTask {
                    task_id: decl.id.clone(),
                    line: decl.line,
                });
            }
            let kind = TaskKind::from_attrs(&decl.id, &decl.task_type, &decl.attrs, decl.line)?;
            let generic = Attrs::new(&decl.id, &decl.attrs);
            let task = Task {
                id: decl.id.clone(),
                timeout: generic.duration("timeout")?,
                index: generic.u32("index")?.unwrap_or(0),
                kind,
                line: decl.line,
            };
            let node = graph.add_node(task);
            by_id.insert(decl.id.clone(), node);
        }

        for edge in &parsed.edges {
            let from = *by_id.get(&edge.from).ok_or_else(|| SpecError::UnknownEdgeTask {
                task_id: edge.from.clone(),
                line: edge.line,
            })?;
            let to = *by_id.get(&edge.to).ok_or_else(|| SpecError::UnknownEdgeTask {
                task_id: edge.to.clone(),
                line: edge.line,
            })?;
            if graph.contains_edge(from, to) {
                return Err(SpecError::DuplicateEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    line: edge.line,
                });
            }
            let kind = match edge.optional {
                Some(true) => DepKind::Optional,
                Some(false) => DepKind::Required,
                None if graph[to].kind.is_aggregate() => DepKind::Optional,
                None => DepKind::Required,
            };
            graph.add_edge(from, to, kind);
        }

        let topo = toposort(&graph, None).map_err(|cycle| SpecError::Cycle {
            task_id: graph[cycle.node_id()].id.clone(),
        })?;

        validate_references(&graph)?;
        validate_bridges(&graph, bridges)?;

        let terminals: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&n| graph.edges_directed(n, Direction::Outgoing).next().is_none())
            .collect();

        let mut fan_in = vec![Vec::new(); graph.node_count()];
        for node in graph.node_indices() {
            let mut upstream: Vec<NodeIndex> =
                graph.neighbors_directed(node, Direction::Incoming).collect();
            upstream.sort_by_key(|&u| (graph[u].index, u.index()));
            fan_in[node.index()] = upstream;
        }

        Ok(Self {
            name: name.to_string(),
            graph,
            topo,
            terminals,
            fan_in,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Looks a task up by id.
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.graph
            .node_indices()
            .map(|n| &self.graph[n])
            .find(|t| t.id == task_id)
    }

    /// Tasks in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.graph.node_indices().map(move |n| &self.graph[n])
    }

    pub(crate) fn inner(&self) -> &DiGraph<Task, DepKind> {
        &self.graph
    }

    pub(crate) fn node_task(&self, node: NodeIndex) -> &Task {
        &self.graph[node]
    }

    pub(crate) fn topo(&self) -> &[NodeIndex] {
        &self.topo
    }

    pub(crate) fn terminals(&self) -> &[NodeIndex] {
        &self.terminals
    }

    pub(crate) fn fan_in(&self, node: NodeIndex) -> &[NodeIndex] {
        &self.fan_in[node.index()]
    }
}

/// Every task-head reference must name a direct upstream dependency;
/// `inputs.*` references are resolved against trigger variables at run time.
fn validate_references(graph: &DiGraph<Task, DepKind>) -> Result<(), SpecError> {
    for node in graph.node_indices() {
        let task = &graph[node];
        for (param, reference) in task.kind.references() {
            if reference.is_input() {
                continue;
            }
            let feeds_this_task = graph
                .neighbors_directed(node, Direction::Incoming)
                .any(|upstream| graph[upstream].id == reference.head);
            if !feeds_this_task {
                return Err(SpecError::UnresolvedReference {
                    task_id: task.id.clone(),
                    param: param.to_string(),
                    target: reference.head.clone(),
                });
            }
        }
    }
    Ok(())
}

fn validate_bridges(
    graph: &DiGraph<Task, DepKind>,
    bridges: &BridgeRegistry,
) -> Result<(), SpecError> {
    for node in graph.node_indices() {
        let task = &graph[node];
        if let TaskKind::Bridge(bridge) = &task.kind {
            if !bridges.contains(&bridge.name) {
                return Err(SpecError::UnknownBridge {
                    task_id: task.id.clone(),
                    name: bridge.name.clone(),
                });
            }
        }
    }
    Ok(())
}

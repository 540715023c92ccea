//! Pipeline DAG for dependency management.
//!
//! The DAG holds the immutable task specs of one pipeline, connected by
//! explicit ordering edges and by data edges derived from declared input
//! references. Validation runs before any execution: cycle detection with
//! the offending path, and a check that every declared input names an
//! output that exists somewhere in the pipeline.

use crate::core::task::{InputSource, TaskName, TaskRunState, TaskSpec};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::collections::HashMap;

/// Why one task must complete before another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeKind {
    /// The downstream task consumes the named output of the upstream task.
    Data {
        /// Output slot on the upstream task.
        output: String,
    },
    /// Explicit ordering without data flow.
    Ordering,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Data { output } => write!(f, "data: {}", output),
            EdgeKind::Ordering => write!(f, "ordering"),
        }
    }
}

/// Colors for the validation DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// The pipeline dependency graph.
///
/// Nodes are `TaskSpec`s, edges carry the dependency kind. A name index
/// gives O(1) lookups; the edge set is the union of explicit `after`
/// edges and edges implied by input/output references.
pub struct PipelineDag {
    /// The underlying directed graph.
    graph: DiGraph<TaskSpec, EdgeKind>,
    /// Index mapping from TaskName to NodeIndex for fast lookups.
    index: HashMap<TaskName, NodeIndex>,
}

impl PipelineDag {
    /// Create a new empty DAG.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Build a DAG from task specs, deriving all edges.
    ///
    /// Explicit `after` predecessors must name tasks present in the set.
    /// Data edges are added for every input that references a task in the
    /// set; references to absent tasks are left for `validate()` to report
    /// as unresolved inputs.
    pub fn from_specs(specs: Vec<TaskSpec>) -> Result<Self> {
        let mut dag = Self::new();
        for spec in specs {
            dag.add_task(spec)?;
        }
        dag.derive_edges()?;
        Ok(dag)
    }

    /// Add a task to the DAG.
    ///
    /// # Errors
    /// Returns `DuplicateTaskName` if a task with the same name exists.
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<NodeIndex> {
        if self.index.contains_key(&spec.name) {
            return Err(Error::DuplicateTaskName(spec.name));
        }
        let name = spec.name.clone();
        let idx = self.graph.add_node(spec);
        self.index.insert(name, idx);
        Ok(idx)
    }

    /// Add a dependency edge: `from` must complete before `to` starts.
    ///
    /// # Errors
    /// Returns `UnknownTask` if either endpoint is absent. Cycles are not
    /// checked here; `validate()` reports them with the offending path.
    pub fn add_edge(&mut self, from: &TaskName, to: &TaskName, kind: EdgeKind) -> Result<()> {
        let from_idx = self
            .index
            .get(from)
            .copied()
            .ok_or_else(|| Error::UnknownTask(from.clone()))?;
        let to_idx = self
            .index
            .get(to)
            .copied()
            .ok_or_else(|| Error::UnknownTask(to.clone()))?;
        self.graph.update_edge(from_idx, to_idx, kind);
        Ok(())
    }

    /// Derive edges from every spec's declared inputs and `after` list.
    fn derive_edges(&mut self) -> Result<()> {
        let specs: Vec<TaskSpec> = self.graph.node_weights().cloned().collect();
        for spec in &specs {
            for predecessor in &spec.after {
                self.add_edge(predecessor, &spec.name, EdgeKind::Ordering)?;
            }
            for binding in &spec.inputs {
                if let InputSource::TaskOutput { task, output } = &binding.source {
                    // Absent producers are an UnresolvedInput, found by
                    // validate(); only wire edges for tasks that exist.
                    if self.index.contains_key(task) {
                        self.add_edge(
                            task,
                            &spec.name,
                            EdgeKind::Data {
                                output: output.clone(),
                            },
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Get a task spec by name.
    pub fn get(&self, name: &TaskName) -> Option<&TaskSpec> {
        self.index
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Check if the DAG contains a task.
    pub fn contains(&self, name: &TaskName) -> bool {
        self.index.contains_key(name)
    }

    /// Number of tasks in the DAG.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of dependency edges in the DAG.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All task names, sorted.
    pub fn task_names(&self) -> Vec<TaskName> {
        let mut names: Vec<TaskName> = self.index.keys().cloned().collect();
        names.sort();
        names
    }

    /// All task specs, in name order.
    pub fn specs(&self) -> Vec<&TaskSpec> {
        let mut specs: Vec<&TaskSpec> = self.graph.node_weights().collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Direct predecessors of a task.
    pub fn predecessors(&self, name: &TaskName) -> Vec<TaskName> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut names: Vec<TaskName> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .filter_map(|n| self.graph.node_weight(n))
            .map(|spec| spec.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Every task reachable downstream of the given task, excluding it.
    ///
    /// Used for failure fan-out: these are the tasks that must be skipped
    /// when `name` fails.
    pub fn descendants(&self, name: &TaskName) -> Vec<TaskName> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut names = Vec::new();
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != start {
                if let Some(spec) = self.graph.node_weight(idx) {
                    names.push(spec.name.clone());
                }
            }
        }
        names.sort();
        names
    }

    /// Tasks ready to launch: `NotStarted` with every predecessor `Succeeded`.
    ///
    /// Returned in name order, which is the orchestrator's deterministic
    /// scheduling tie-break.
    pub fn ready_tasks(&self, states: &HashMap<TaskName, TaskRunState>) -> Vec<TaskName> {
        let mut ready: Vec<TaskName> = self
            .graph
            .node_indices()
            .filter_map(|idx| {
                let spec = self.graph.node_weight(idx)?;
                if states.get(&spec.name) != Some(&TaskRunState::NotStarted) {
                    return None;
                }
                let deps_met = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .all(|dep| {
                        self.graph
                            .node_weight(dep)
                            .map(|d| states.get(&d.name) == Some(&TaskRunState::Succeeded))
                            .unwrap_or(false)
                    });
                deps_met.then(|| spec.name.clone())
            })
            .collect();
        ready.sort();
        ready
    }

    /// Validate the DAG before execution. Idempotent and side-effect free.
    ///
    /// Checks, in order:
    /// 1. Acyclicity, by three-color depth-first traversal. A back-edge to
    ///    an in-progress node fails with `CycleDetected` carrying the
    ///    offending path (self-references included).
    /// 2. Every declared `TaskOutput` input names an output that a task in
    ///    this DAG actually declares, failing with `UnresolvedInput`.
    ///    External inputs are checked for existence at resolution time,
    ///    not here.
    pub fn validate(&self) -> Result<()> {
        self.check_acyclic()?;
        self.check_input_references()
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut marks: HashMap<NodeIndex, Mark> = self
            .graph
            .node_indices()
            .map(|idx| (idx, Mark::Unvisited))
            .collect();

        // Roots in name order so the reported path is deterministic.
        let mut roots: Vec<NodeIndex> = self.graph.node_indices().collect();
        roots.sort_by(|a, b| {
            let an = &self.graph[*a].name;
            let bn = &self.graph[*b].name;
            an.cmp(bn)
        });

        for root in roots {
            if marks[&root] == Mark::Unvisited {
                let mut stack = Vec::new();
                self.dfs_visit(root, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn dfs_visit(
        &self,
        node: NodeIndex,
        marks: &mut HashMap<NodeIndex, Mark>,
        stack: &mut Vec<NodeIndex>,
    ) -> Result<()> {
        marks.insert(node, Mark::InProgress);
        stack.push(node);

        let mut successors: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        successors.sort_by(|a, b| self.graph[*a].name.cmp(&self.graph[*b].name));
        successors.dedup();

        for next in successors {
            match marks[&next] {
                Mark::InProgress => {
                    // Back edge: the cycle runs from the first occurrence
                    // of `next` on the stack through `node` and back.
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut path: Vec<TaskName> = stack[start..]
                        .iter()
                        .map(|&idx| self.graph[idx].name.clone())
                        .collect();
                    path.push(self.graph[next].name.clone());
                    return Err(Error::CycleDetected { path });
                }
                Mark::Unvisited => self.dfs_visit(next, marks, stack)?,
                Mark::Done => {}
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        Ok(())
    }

    fn check_input_references(&self) -> Result<()> {
        for spec in self.specs() {
            for binding in &spec.inputs {
                if let InputSource::TaskOutput { task, output } = &binding.source {
                    let producer_declares = self
                        .get(task)
                        .map(|producer| producer.outputs.iter().any(|o| o == output))
                        .unwrap_or(false);
                    if !producer_declares {
                        return Err(Error::UnresolvedInput {
                            task: spec.name.clone(),
                            input: binding.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for PipelineDag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PipelineDag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDag")
            .field("tasks", &self.task_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}

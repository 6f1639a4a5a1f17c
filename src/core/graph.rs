//! Build dependency graph construction and queries.
//!
//! A submission expands into a directed acyclic graph of build tasks:
//! one node per distinct (configuration, revision), edges pointing from
//! dependency to dependant. Topology is owned by the builder and is
//! read-only after construction; only per-task status fields mutate
//! afterwards.

use crate::core::task::{BuildStatus, BuildTask, ConfigRef, TaskId};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, VecDeque};

/// Resolver capability for a configuration's declared direct dependencies.
///
/// Implemented by the configuration-store collaborator. An unknown
/// configuration is an error and rejects the whole submission.
pub trait DependencyResolver: Send + Sync {
    fn direct_dependencies(&self, config: &ConfigRef) -> Result<Vec<ConfigRef>>;
}

/// The build task dependency graph.
///
/// Nodes are build tasks; an edge `a -> b` means `b` depends on `a`
/// (`a` must finish before `b` can be submitted). Node indices follow
/// discovery order, which is used for deterministic iteration and
/// logging only, never for correctness.
pub struct BuildGraph {
    graph: DiGraph<BuildTask, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
    config_index: HashMap<ConfigRef, TaskId>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
            config_index: HashMap::new(),
        }
    }

    /// Add a task to the graph, deduplicating by configuration reference.
    ///
    /// If a task for the same (configuration, revision) already exists,
    /// its id is returned and the argument is dropped.
    pub fn add_task(&mut self, task: BuildTask) -> TaskId {
        if let Some(&existing) = self.config_index.get(&task.config) {
            return existing;
        }

        let id = task.id;
        let config = task.config.clone();
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        self.config_index.insert(config, id);
        id
    }

    /// Add a dependency edge: `dependency` must finish before `dependant`.
    ///
    /// Duplicate edges collapse. Cycle checking happens once over the
    /// finished graph (the whole submission is rejected on a cycle), not
    /// per edge.
    pub fn add_dependency(&mut self, dependency: &TaskId, dependant: &TaskId) -> Result<()> {
        let from = *self
            .task_index
            .get(dependency)
            .ok_or(Error::TaskNotFound(*dependency))?;
        let to = *self
            .task_index
            .get(dependant)
            .ok_or(Error::TaskNotFound(*dependant))?;

        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    /// Get a task by its id.
    pub fn task(&self, id: &TaskId) -> Option<&BuildTask> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable task by its id.
    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut BuildTask> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph.node_weight_mut(index)
        } else {
            None
        }
    }

    /// Get the task id for a configuration reference, if present.
    pub fn id_for_config(&self, config: &ConfigRef) -> Option<TaskId> {
        self.config_index.get(config).copied()
    }

    /// Get a task by its configuration reference.
    pub fn task_by_config(&self, config: &ConfigRef) -> Option<&BuildTask> {
        self.id_for_config(config).and_then(|id| self.task(&id))
    }

    /// Ids of the tasks this task depends on.
    pub fn dependencies(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, petgraph::Direction::Incoming)
    }

    /// Ids of the tasks that depend on this task.
    pub fn dependants(&self, id: &TaskId) -> Vec<TaskId> {
        self.neighbor_ids(id, petgraph::Direction::Outgoing)
    }

    fn neighbor_ids(&self, id: &TaskId, direction: petgraph::Direction) -> Vec<TaskId> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, direction)
                .filter_map(|neighbor| self.graph.node_weight(neighbor))
                .map(|task| task.id)
                .collect()
        } else {
            Vec::new()
        }
    }

    /// All task ids in discovery order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.graph
            .node_indices()
            .filter_map(|index| self.graph.node_weight(index))
            .map(|task| task.id)
            .collect()
    }

    /// Iterate all tasks in discovery order.
    pub fn tasks(&self) -> impl Iterator<Item = &BuildTask> {
        self.graph.node_weights()
    }

    /// Current statuses of all member tasks, discovery order.
    pub fn statuses(&self) -> Vec<BuildStatus> {
        self.tasks().map(|task| task.status).collect()
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Apply a status transition to a member task.
    ///
    /// Returns the previous status on an actual change, `None` for an
    /// idempotent re-application, and an error for a transition out of
    /// a terminal status (see [`BuildTask::apply_status`]).
    pub fn set_status(&mut self, id: &TaskId, new: BuildStatus) -> Result<Option<BuildStatus>> {
        self.task_mut(id)
            .ok_or(Error::TaskNotFound(*id))?
            .apply_status(new)
    }

    /// Find a dependency cycle, if any, via a three-color walk.
    ///
    /// Returns the cycle as a task path ending where it started, or
    /// `None` for an acyclic graph.
    pub fn detect_cycle(&self) -> Option<Vec<TaskId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut color = vec![Color::White; self.graph.node_count()];
        let outgoing = |node: NodeIndex| -> Vec<NodeIndex> {
            self.graph
                .neighbors_directed(node, petgraph::Direction::Outgoing)
                .collect()
        };
        let id_of = |node: NodeIndex| self.graph.node_weight(node).map(|task| task.id);

        for start in self.graph.node_indices() {
            if color[start.index()] != Color::White {
                continue;
            }

            color[start.index()] = Color::Gray;
            let mut stack: Vec<(NodeIndex, Vec<NodeIndex>, usize)> = vec![(start, outgoing(start), 0)];

            while let Some(top) = stack.len().checked_sub(1) {
                let next = {
                    let (node, neighbors, cursor) = &mut stack[top];
                    if *cursor == neighbors.len() {
                        color[node.index()] = Color::Black;
                        stack.pop();
                        continue;
                    }
                    let next = neighbors[*cursor];
                    *cursor += 1;
                    next
                };

                match color[next.index()] {
                    Color::White => {
                        color[next.index()] = Color::Gray;
                        stack.push((next, outgoing(next), 0));
                    }
                    Color::Gray => {
                        // Back edge: the cycle runs from `next`'s frame to
                        // the top of the stack and closes at `next`.
                        let pos = stack
                            .iter()
                            .position(|(node, _, _)| *node == next)
                            .unwrap_or(0);
                        let mut path: Vec<TaskId> =
                            stack[pos..].iter().filter_map(|(node, _, _)| id_of(*node)).collect();
                        if let Some(id) = id_of(next) {
                            path.push(id);
                        }
                        return Some(path);
                    }
                    Color::Black => {}
                }
            }
        }
        None
    }
}

impl Default for BuildGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BuildGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildGraph")
            .field("tasks", &self.task_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

/// Expands a submission's root configurations into a [`BuildGraph`].
pub struct GraphBuilder<'a> {
    resolver: &'a dyn DependencyResolver,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(resolver: &'a dyn DependencyResolver) -> Self {
        Self { resolver }
    }

    /// Build the task graph for a set of root configurations.
    ///
    /// Breadth-first expansion through the resolver. Identical
    /// (configuration, revision) pairs reached via different paths
    /// collapse to one node, with all dependants pointing at it. On a
    /// cycle or an unknown configuration the whole submission is
    /// rejected and no graph is returned.
    pub fn build(&self, roots: &[ConfigRef]) -> Result<BuildGraph> {
        if roots.is_empty() {
            return Err(Error::Validation(
                "submission contains no configurations".to_string(),
            ));
        }

        let mut graph = BuildGraph::new();
        let mut queue: VecDeque<(ConfigRef, TaskId)> = VecDeque::new();

        for root in roots {
            if graph.id_for_config(root).is_none() {
                let id = graph.add_task(BuildTask::new(root.clone()));
                queue.push_back((root.clone(), id));
            }
        }

        while let Some((config, dependant)) = queue.pop_front() {
            for dep in self.resolver.direct_dependencies(&config)? {
                let dep_id = match graph.id_for_config(&dep) {
                    Some(id) => id,
                    None => {
                        let id = graph.add_task(BuildTask::new(dep.clone()));
                        queue.push_back((dep.clone(), id));
                        id
                    }
                };
                graph.add_dependency(&dep_id, &dependant)?;
            }
        }

        if let Some(cycle) = graph.detect_cycle() {
            let path = cycle
                .iter()
                .filter_map(|id| graph.task(id))
                .map(|task| task.config.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(Error::CycleDetected { path });
        }

        // Tasks with dependencies start out waiting; roots of the graph
        // stay NEW until claimed for submission.
        for id in graph.task_ids() {
            if !graph.dependencies(&id).is_empty() {
                graph.set_status(&id, BuildStatus::WaitingForDependencies)?;
            }
        }

        Ok(graph)
    }
}

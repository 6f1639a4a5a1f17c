//! Failure cascade and submission eligibility.
//!
//! When a task reaches a non-success terminal status, every dependant
//! that has not finished must be rejected — exactly once, even when the
//! graph is diamond-shaped. The same module answers the inverse
//! question: which tasks become submittable after a success.

use crate::core::graph::BuildGraph;
use crate::core::task::{BuildStatus, TaskId};
use std::collections::{HashSet, VecDeque};

/// Walk dependants of `origin` breadth-first and transition every
/// non-terminal one to `REJECTED_FAILED_DEPENDENCIES`.
///
/// A visited set guarantees each task is processed once, so converging
/// paths cannot double-transition a node. Already-terminal dependants are
/// left untouched but still traversed through, in case an earlier cascade
/// stopped at them. Returns the applied transitions in walk order.
pub fn cascade_failure(
    graph: &mut BuildGraph,
    origin: &TaskId,
) -> Vec<(TaskId, BuildStatus, BuildStatus)> {
    let mut transitions = Vec::new();
    let mut visited: HashSet<TaskId> = HashSet::new();
    let mut queue: VecDeque<TaskId> = VecDeque::new();

    visited.insert(*origin);
    queue.extend(graph.dependants(origin));

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }

        let non_terminal = graph
            .task(&id)
            .map(|task| !task.status.is_terminal())
            .unwrap_or(false);
        if non_terminal {
            if let Ok(Some(old)) =
                graph.set_status(&id, BuildStatus::RejectedFailedDependencies)
            {
                transitions.push((id, old, BuildStatus::RejectedFailedDependencies));
            }
        }

        queue.extend(graph.dependants(&id));
    }

    transitions
}

/// Check whether a task can be handed to the remote engine.
///
/// Eligible means: present, not terminal, not yet submitted, not already
/// claimed for submission, and every dependency finished with a
/// success-equivalent status.
pub fn is_eligible(graph: &BuildGraph, id: &TaskId, pending: &HashSet<TaskId>) -> bool {
    let Some(task) = graph.task(id) else {
        return false;
    };
    if task.status.is_terminal() || task.is_submitted() || pending.contains(id) {
        return false;
    }
    graph.dependencies(id).iter().all(|dep| {
        graph
            .task(dep)
            .map(|t| t.status.is_success())
            .unwrap_or(false)
    })
}

/// All currently eligible tasks, in discovery order.
///
/// Used for the initial submission wave of a freshly constructed group.
pub fn submission_candidates(graph: &BuildGraph, pending: &HashSet<TaskId>) -> Vec<TaskId> {
    graph
        .task_ids()
        .into_iter()
        .filter(|id| is_eligible(graph, id, pending))
        .collect()
}

/// Dependants of a just-finished task that became eligible.
pub fn unlocked_dependants(
    graph: &BuildGraph,
    of: &TaskId,
    pending: &HashSet<TaskId>,
) -> Vec<TaskId> {
    graph
        .dependants(of)
        .into_iter()
        .filter(|id| is_eligible(graph, id, pending))
        .collect()
}

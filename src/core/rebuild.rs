//! Rebuild avoidance.
//!
//! Before a task is ever submitted to the remote engine, the coordinator
//! asks the build history whether an equivalent successful build already
//! exists. The identity criterion (revision equality, content hashes) is
//! owned entirely by the [`BuildHistory`] implementor.

use crate::core::task::{BuildRef, ConfigRef};
use std::collections::HashMap;
use std::sync::RwLock;

/// Query capability against completed builds.
///
/// Implemented by the persistence collaborator. The coordinator never
/// interprets the match rule; a returned [`BuildRef`] means "this build
/// already produced the requested configuration revision".
pub trait BuildHistory: Send + Sync {
    /// Find the latest successful build of the exact configuration revision.
    fn find_latest_successful_build(&self, config: &ConfigRef) -> Option<BuildRef>;
}

/// Outcome of the rebuild decision for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildDecision {
    /// No reusable build exists; the task must execute.
    MustBuild,
    /// A prior build satisfies the request; skip execution and record it.
    NoRebuildRequired(BuildRef),
}

/// Decide whether a configuration needs a new execution.
///
/// Made once per task, before any remote submission, and never revisited.
pub fn decide(history: &dyn BuildHistory, config: &ConfigRef) -> RebuildDecision {
    match history.find_latest_successful_build(config) {
        Some(build) => RebuildDecision::NoRebuildRequired(build),
        None => RebuildDecision::MustBuild,
    }
}

/// In-memory build history keyed on exact `ConfigRef` equality.
///
/// Useful for embedders without a persistence layer and for tests.
#[derive(Debug, Default)]
pub struct InMemoryBuildHistory {
    builds: RwLock<HashMap<ConfigRef, BuildRef>>,
}

impl InMemoryBuildHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful build, replacing any earlier record for the
    /// same configuration revision.
    pub fn record(&self, config: ConfigRef, build: BuildRef) {
        self.builds
            .write()
            .expect("build history lock poisoned")
            .insert(config, build);
    }
}

impl BuildHistory for InMemoryBuildHistory {
    fn find_latest_successful_build(&self, config: &ConfigRef) -> Option<BuildRef> {
        self.builds
            .read()
            .expect("build history lock poisoned")
            .get(config)
            .copied()
    }
}

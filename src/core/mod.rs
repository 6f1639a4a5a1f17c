//! Core domain models for build coordination.
//!
//! This module contains the fundamental data structures and pure logic:
//! build tasks and statuses, the dependency graph, the remote state
//! translator, and the rebuild decision engine.

pub mod graph;
pub mod rebuild;
pub mod task;
pub mod translate;

pub use graph::{BuildGraph, DependencyResolver, GraphBuilder};
pub use rebuild::{decide, BuildHistory, InMemoryBuildHistory, RebuildDecision};
pub use task::{BuildRef, BuildStatus, BuildTask, ConfigRef, TaskId};
pub use translate::{translate, ExecutionState, StopFlag};

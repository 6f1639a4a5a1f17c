//! kiln — dependency-aware build task coordination.
//!
//! The coordinator decides whether a build is necessary, expands a
//! submission into a dependency graph of build tasks, hands eligible
//! tasks to a remote execution engine, translates the engine's generic
//! state reports into build statuses, and cascades failure and
//! cancellation through the graph. Persistence, configuration storage,
//! and notification delivery are collaborators injected at construction.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod remote;

pub use crate::config::Config;
pub use crate::core::task::{BuildRef, BuildStatus, BuildTask, ConfigRef, TaskId};
pub use crate::error::{Error, Result};
pub use crate::orchestration::{
    BuildCoordinator, CoordinationEvent, GroupBuildId, GroupBuildOptions, GroupStatus,
};
pub use crate::remote::{RemoteEngine, RemoteTaskId, RemoteTaskReport, RetryPolicy};

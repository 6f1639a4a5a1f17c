//! Build task data model.
//!
//! A build task is one schedulable unit of work: building a specific
//! configuration revision. Tasks track their coordination status,
//! rebuild-avoidance cause, remote engine handle, and timing.

use crate::error::{Error, Result};
use crate::remote::RemoteTaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a build task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Identity of what is to be built: a configuration at an exact revision.
///
/// Immutable once a task is created. Two tasks for the same `ConfigRef`
/// within one submission collapse to a single graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigRef {
    /// Configuration identifier (name or opaque id).
    pub configuration: String,
    /// Revision the build must use.
    pub revision: String,
}

impl ConfigRef {
    pub fn new(configuration: &str, revision: &str) -> Self {
        Self {
            configuration: configuration.to_string(),
            revision: revision.to_string(),
        }
    }
}

impl std::fmt::Display for ConfigRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.configuration, self.revision)
    }
}

/// Reference to a previously completed build record.
///
/// A weak back-reference: it identifies the build that made a rebuild
/// unnecessary and never participates in dependency cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildRef(pub Uuid);

impl BuildRef {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BuildRef {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BuildRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Domain build-coordination status of a task.
///
/// Non-terminal statuses track the remote engine's progress reports;
/// terminal statuses are reached exactly once. The only permitted
/// "transition" out of a terminal status is an idempotent re-delivery
/// of the same status, which is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
    /// Task created, not yet picked up by the engine.
    New,
    /// Task is waiting for its dependencies to finish.
    WaitingForDependencies,
    /// Task is queued on the remote engine.
    Enqueued,
    /// Task is executing on the remote engine.
    Building,
    /// Build finished successfully.
    Done,
    /// Build ran and failed.
    DoneWithErrors,
    /// Infrastructure failure (engine error, submission retries exhausted).
    SystemError,
    /// Build was cancelled before completing.
    Cancelled,
    /// A dependency did not finish successfully; never executed.
    RejectedFailedDependencies,
    /// An equivalent successful build already exists; never executed.
    RejectedAlreadyBuilt,
}

impl BuildStatus {
    /// Check if this status is final for the task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Done
                | BuildStatus::DoneWithErrors
                | BuildStatus::SystemError
                | BuildStatus::Cancelled
                | BuildStatus::RejectedFailedDependencies
                | BuildStatus::RejectedAlreadyBuilt
        )
    }

    /// Check if this status counts as success for dependants.
    ///
    /// A skipped, already-built task unblocks its dependants exactly
    /// like a freshly completed one.
    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Done | BuildStatus::RejectedAlreadyBuilt)
    }

    /// Check if this status is terminal and not success-equivalent.
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && !self.is_success()
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildStatus::New => "NEW",
            BuildStatus::WaitingForDependencies => "WAITING_FOR_DEPENDENCIES",
            BuildStatus::Enqueued => "ENQUEUED",
            BuildStatus::Building => "BUILDING",
            BuildStatus::Done => "DONE",
            BuildStatus::DoneWithErrors => "DONE_WITH_ERRORS",
            BuildStatus::SystemError => "SYSTEM_ERROR",
            BuildStatus::Cancelled => "CANCELLED",
            BuildStatus::RejectedFailedDependencies => "REJECTED_FAILED_DEPENDENCIES",
            BuildStatus::RejectedAlreadyBuilt => "REJECTED_ALREADY_BUILT",
        };
        write!(f, "{}", s)
    }
}

/// A single build task in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildTask {
    /// Unique identifier, stable across the task's lifetime.
    pub id: TaskId,
    /// What is to be built. Immutable after creation.
    pub config: ConfigRef,
    /// Current coordination status.
    pub status: BuildStatus,
    /// The prior build that made this task unnecessary, if any.
    pub no_rebuild_cause: Option<BuildRef>,
    /// Identifier assigned by the remote engine after submission.
    pub remote_id: Option<RemoteTaskId>,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was submitted to the remote engine.
    pub submitted_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl BuildTask {
    /// Create a new task for a configuration reference.
    ///
    /// The task starts in `New`; the graph builder demotes it to
    /// `WaitingForDependencies` once dependency edges are wired.
    pub fn new(config: ConfigRef) -> Self {
        Self {
            id: TaskId::new(),
            config,
            status: BuildStatus::New,
            no_rebuild_cause: None,
            remote_id: None,
            created_at: Utc::now(),
            submitted_at: None,
            completed_at: None,
        }
    }

    /// Apply a status transition, enforcing the terminal-state rule.
    ///
    /// Returns the previous status when the status actually changed,
    /// `None` for a no-op (same status re-applied, including idempotent
    /// re-delivery of a terminal status), and an error when the task is
    /// already terminal and the new status differs.
    pub fn apply_status(&mut self, new: BuildStatus) -> Result<Option<BuildStatus>> {
        if self.status == new {
            return Ok(None);
        }
        if self.status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: new,
            });
        }
        let old = self.status;
        self.status = new;
        if new.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(Some(old))
    }

    /// Record the remote engine's identifier for this task.
    pub fn record_submission(&mut self, remote_id: RemoteTaskId) {
        self.remote_id = Some(remote_id);
        self.submitted_at = Some(Utc::now());
    }

    /// Check if the task has been handed to the remote engine.
    pub fn is_submitted(&self) -> bool {
        self.remote_id.is_some()
    }
}

//! Group build lifecycle and aggregate status.
//!
//! A group build is a named set of build tasks submitted together. Its
//! status is derived from member statuses; membership is fixed at
//! submission time and the group becomes immutable once every member is
//! terminal.

use crate::core::graph::BuildGraph;
use crate::core::task::{BuildStatus, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique identifier for a group build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupBuildId(pub Uuid);

impl GroupBuildId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for GroupBuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupBuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GroupBuildId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Aggregate status of a group build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    /// At least one member has not reached a terminal status.
    Building,
    /// Every member succeeded (built or reused an existing build).
    Done,
    /// At least one member failed or hit an infrastructure error.
    DoneWithErrors,
    /// Terminal without errors but not fully successful: members were
    /// cancelled or rejected.
    Cancelled,
}

impl GroupStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GroupStatus::Building)
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GroupStatus::Building => "BUILDING",
            GroupStatus::Done => "DONE",
            GroupStatus::DoneWithErrors => "DONE_WITH_ERRORS",
            GroupStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Options accompanying a group build submission.
#[derive(Debug, Clone, Default)]
pub struct GroupBuildOptions {
    /// Human-readable name for the group.
    pub name: Option<String>,
    /// Skip the rebuild-avoidance check and build every member.
    pub force_rebuild: bool,
}

/// Derive the aggregate group status from member statuses.
pub fn aggregate_status(statuses: &[BuildStatus]) -> GroupStatus {
    if statuses.iter().any(|s| !s.is_terminal()) {
        return GroupStatus::Building;
    }
    if statuses.iter().all(|s| s.is_success()) {
        return GroupStatus::Done;
    }
    if statuses
        .iter()
        .any(|s| matches!(s, BuildStatus::DoneWithErrors | BuildStatus::SystemError))
    {
        return GroupStatus::DoneWithErrors;
    }
    GroupStatus::Cancelled
}

/// A group build: the member task graph plus lifecycle bookkeeping.
pub struct GroupBuild {
    pub id: GroupBuildId,
    pub name: Option<String>,
    pub status: GroupStatus,
    /// Member tasks and their dependency topology. Topology is read-only
    /// after construction; member statuses mutate under the group lock.
    pub graph: BuildGraph,
    /// Whether a group-level cancellation was requested.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Tasks claimed for submission whose remote id is not yet recorded.
    /// Guarantees exactly-once submission under concurrent reports.
    pub(crate) pending_submit: HashSet<TaskId>,
    /// Cancels in-flight submission retries for this group.
    pub(crate) cancel_token: CancellationToken,
}

impl GroupBuild {
    pub fn new(id: GroupBuildId, name: Option<String>, graph: BuildGraph) -> Self {
        Self {
            id,
            name,
            status: GroupStatus::Building,
            graph,
            cancel_requested: false,
            created_at: Utc::now(),
            completed_at: None,
            pending_submit: HashSet::new(),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Recompute the aggregate status from member statuses.
    ///
    /// Returns `(old, new)` when the status changed; records the
    /// completion time on the transition to a terminal status.
    pub fn refresh_status(&mut self) -> Option<(GroupStatus, GroupStatus)> {
        let new = aggregate_status(&self.graph.statuses());
        if new == self.status {
            return None;
        }
        let old = self.status;
        self.status = new;
        if new.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        Some((old, new))
    }
}

impl std::fmt::Debug for GroupBuild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupBuild")
            .field("id", &self.id.short())
            .field("status", &self.status)
            .field("tasks", &self.graph.task_count())
            .field("cancel_requested", &self.cancel_requested)
            .finish()
    }
}

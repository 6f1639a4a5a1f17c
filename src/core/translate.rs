//! Translation from the remote engine's state vocabulary to build statuses.
//!
//! The remote engine reports a generic execution state plus a stop flag.
//! That compound discriminant stays at this boundary: reports are converted
//! immediately through the fixed table in [`translate`] and only
//! [`BuildStatus`](crate::core::task::BuildStatus) flows further in.

use crate::core::task::BuildStatus;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle state reported by the remote execution engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    New,
    Waiting,
    Enqueued,
    Starting,
    Up,
    Stopping,
    StopRequested,
    StartFailed,
    StopFailed,
    Failed,
    Successful,
    Stopped,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionState::New => "NEW",
            ExecutionState::Waiting => "WAITING",
            ExecutionState::Enqueued => "ENQUEUED",
            ExecutionState::Starting => "STARTING",
            ExecutionState::Up => "UP",
            ExecutionState::Stopping => "STOPPING",
            ExecutionState::StopRequested => "STOP_REQUESTED",
            ExecutionState::StartFailed => "START_FAILED",
            ExecutionState::StopFailed => "STOP_FAILED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Successful => "SUCCESSFUL",
            ExecutionState::Stopped => "STOPPED",
        };
        write!(f, "{}", s)
    }
}

/// Why a stopped task stopped. Meaningful only alongside
/// [`ExecutionState::Stopped`]; every other state requires `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopFlag {
    None,
    Unsuccessful,
    Cancelled,
    DependencyFailed,
}

impl std::fmt::Display for StopFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopFlag::None => "NONE",
            StopFlag::Unsuccessful => "UNSUCCESSFUL",
            StopFlag::Cancelled => "CANCELLED",
            StopFlag::DependencyFailed => "DEPENDENCY_FAILED",
        };
        write!(f, "{}", s)
    }
}

/// Map a remote `(execution state, stop flag)` pair to a build status.
///
/// Pure and total over the fixed table; any pair outside the table is a
/// protocol error. The caller must not persist or forward a status for
/// a failed translation — the report is logged and dropped.
pub fn translate(state: ExecutionState, stop: StopFlag) -> Result<BuildStatus> {
    match (state, stop) {
        (ExecutionState::New, StopFlag::None) => Ok(BuildStatus::New),
        (ExecutionState::Waiting, StopFlag::None) => Ok(BuildStatus::WaitingForDependencies),
        (ExecutionState::Enqueued, StopFlag::None) => Ok(BuildStatus::Enqueued),
        (
            ExecutionState::Starting
            | ExecutionState::Up
            | ExecutionState::Stopping
            | ExecutionState::StopRequested,
            StopFlag::None,
        ) => Ok(BuildStatus::Building),
        (ExecutionState::StartFailed | ExecutionState::StopFailed, StopFlag::None) => {
            Ok(BuildStatus::SystemError)
        }
        (ExecutionState::Failed, StopFlag::None) => Ok(BuildStatus::DoneWithErrors),
        (ExecutionState::Successful, StopFlag::None) => Ok(BuildStatus::Done),
        (ExecutionState::Stopped, StopFlag::None | StopFlag::Unsuccessful) => {
            Ok(BuildStatus::SystemError)
        }
        (ExecutionState::Stopped, StopFlag::Cancelled) => Ok(BuildStatus::Cancelled),
        (ExecutionState::Stopped, StopFlag::DependencyFailed) => {
            Ok(BuildStatus::RejectedFailedDependencies)
        }
        (state, stop) => Err(Error::Protocol { state, stop }),
    }
}

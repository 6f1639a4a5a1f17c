//! Remote execution engine boundary.
//!
//! The engine actually runs builds and reports generic lifecycle states
//! back. This module holds the outbound trait, the inbound report shape,
//! and the bounded-backoff submission wrapper. Submission is the only
//! coordinator operation that may block or fail transiently.

use crate::core::task::{ConfigRef, TaskId};
use crate::core::translate::{ExecutionState, StopFlag};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identifier the remote engine assigns to a submitted task. Opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteTaskId(pub String);

impl From<&str> for RemoteTaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RemoteTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One asynchronous state report from the remote engine.
///
/// Ephemeral: consumed once per delivery, never persisted by the core.
/// Delivery is at-least-once; re-delivery of an already-applied terminal
/// report is a no-op downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTaskReport {
    pub remote_id: RemoteTaskId,
    pub state: ExecutionState,
    pub stop: StopFlag,
}

/// Outbound interface to the remote execution engine.
///
/// Implementations distinguish transient transport failures
/// ([`Error::RemoteTransport`], retried) from definitive rejections
/// ([`Error::RemoteRejected`], not retried).
#[async_trait]
pub trait RemoteEngine: Send + Sync {
    /// Submit a task for execution, returning the engine's identifier.
    async fn submit(&self, task_id: &TaskId, config: &ConfigRef) -> Result<RemoteTaskId>;

    /// Ask the engine to stop a running task.
    ///
    /// Asynchronous: the task's status only changes once the engine
    /// reports `STOPPED/CANCELLED`.
    async fn request_cancel(&self, remote_id: &RemoteTaskId) -> Result<()>;
}

/// Bounds for the submission retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Submit a task, retrying transient transport failures with bounded
/// exponential backoff.
///
/// A definitive rejection from the engine returns immediately; the caller
/// marks the task `SYSTEM_ERROR`. Exhausting the attempt bound returns
/// [`Error::SubmitRetriesExhausted`], handled the same way. Cancelling the
/// token abandons the loop with [`Error::SubmissionAborted`]; the task was
/// never handed to the engine.
pub async fn submit_with_retry(
    engine: &dyn RemoteEngine,
    task_id: &TaskId,
    config: &ConfigRef,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<RemoteTaskId> {
    let mut delay = policy.base_delay;

    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::SubmissionAborted);
        }

        let attempt_result = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::SubmissionAborted),
            result = engine.submit(task_id, config) => result,
        };

        match attempt_result {
            Ok(remote_id) => return Ok(remote_id),
            Err(Error::RemoteTransport(msg)) => {
                crate::klog_warn!(
                    "submit attempt {}/{} for {} failed: {}",
                    attempt,
                    policy.max_attempts,
                    config,
                    msg
                );
                if attempt < policy.max_attempts {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::SubmissionAborted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(policy.max_delay);
                }
            }
            // Definitive rejection or any other failure: do not retry.
            Err(e) => return Err(e),
        }
    }

    Err(Error::SubmitRetriesExhausted {
        attempts: policy.max_attempts,
    })
}

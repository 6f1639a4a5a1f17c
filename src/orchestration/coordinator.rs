//! Group build orchestration.
//!
//! The `BuildCoordinator` owns the lifecycle of group builds: it expands
//! submissions into task graphs, decides rebuild avoidance, hands eligible
//! tasks to the remote engine exactly once, ingests the engine's
//! asynchronous state reports, and drives failure/cancellation cascades.
//! It owns no threads of its own beyond short-lived submission tasks; all
//! progress is a reaction to submissions and reports.
//!
//! Locking: every group lives behind its own `Arc<RwLock<GroupBuild>>`,
//! serializing member status mutation per group. No lock spans two
//! groups, and the remote-id index lock is never held together with a
//! group lock.

use crate::core::graph::{DependencyResolver, GraphBuilder};
use crate::core::rebuild::{decide, BuildHistory, RebuildDecision};
use crate::core::task::{BuildStatus, BuildTask, ConfigRef, TaskId};
use crate::core::translate::{translate, ExecutionState, StopFlag};
use crate::error::{Error, Result};
use crate::orchestration::group::{GroupBuild, GroupBuildId, GroupBuildOptions, GroupStatus};
use crate::orchestration::propagate;
use crate::remote::{submit_with_retry, RemoteEngine, RemoteTaskId, RemoteTaskReport, RetryPolicy};
use crate::{klog, klog_debug, klog_error, klog_warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Events emitted on every actual status transition.
///
/// Idempotent re-deliveries and dropped reports emit nothing. External
/// consumers (notification, persistence) observe all progress through
/// this stream; there is no out-of-band error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationEvent {
    /// A member task moved to a new status.
    TaskStatusChanged {
        group_id: GroupBuildId,
        task_id: TaskId,
        old: BuildStatus,
        new: BuildStatus,
    },
    /// A group's aggregate status moved.
    GroupStatusChanged {
        group_id: GroupBuildId,
        old: GroupStatus,
        new: GroupStatus,
    },
}

/// Coordinates dependency-aware build execution against a remote engine.
///
/// Collaborators are constructor-injected; the coordinator holds no
/// global state. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct BuildCoordinator {
    engine: Arc<dyn RemoteEngine>,
    resolver: Arc<dyn DependencyResolver>,
    history: Arc<dyn BuildHistory>,
    retry: RetryPolicy,
    groups: Arc<RwLock<HashMap<GroupBuildId, Arc<RwLock<GroupBuild>>>>>,
    remote_index: Arc<RwLock<HashMap<RemoteTaskId, (GroupBuildId, TaskId)>>>,
    task_index: Arc<RwLock<HashMap<TaskId, GroupBuildId>>>,
    event_tx: mpsc::Sender<CoordinationEvent>,
}

impl BuildCoordinator {
    /// Create a coordinator.
    ///
    /// # Arguments
    ///
    /// * `engine` - Remote execution engine client
    /// * `resolver` - Configuration dependency resolver
    /// * `history` - Build history for rebuild avoidance
    /// * `retry` - Bounds for the submission retry loop
    /// * `event_tx` - Channel for status-changed events
    pub fn new(
        engine: Arc<dyn RemoteEngine>,
        resolver: Arc<dyn DependencyResolver>,
        history: Arc<dyn BuildHistory>,
        retry: RetryPolicy,
        event_tx: mpsc::Sender<CoordinationEvent>,
    ) -> Self {
        Self {
            engine,
            resolver,
            history,
            retry,
            groups: Arc::new(RwLock::new(HashMap::new())),
            remote_index: Arc::new(RwLock::new(HashMap::new())),
            task_index: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Create a coordinator from a [`Config`](crate::config::Config),
    /// returning the receiving end of its event channel alongside it.
    pub fn with_config(
        engine: Arc<dyn RemoteEngine>,
        resolver: Arc<dyn DependencyResolver>,
        history: Arc<dyn BuildHistory>,
        config: &crate::config::Config,
    ) -> (Self, mpsc::Receiver<CoordinationEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let coordinator = Self::new(engine, resolver, history, config.retry_policy(), event_tx);
        (coordinator, event_rx)
    }

    /// Submit a group build for a set of root configurations.
    ///
    /// Graph construction, rebuild decisions, and the initial eligibility
    /// pass happen synchronously; configuration errors (cycles, unknown
    /// configurations, empty submissions) are returned here and nothing
    /// is scheduled. Remote submission of the initial wave is spawned and
    /// proceeds asynchronously.
    pub async fn submit_group_build(
        &self,
        roots: Vec<ConfigRef>,
        options: GroupBuildOptions,
    ) -> Result<GroupBuildId> {
        let graph = GraphBuilder::new(self.resolver.as_ref()).build(&roots)?;
        let group_id = GroupBuildId::new();
        let mut group = GroupBuild::new(group_id, options.name.clone(), graph);
        let mut events = Vec::new();

        // Rebuild avoidance: decided once per task, before any remote
        // submission, never revisited.
        if !options.force_rebuild {
            for task_id in group.graph.task_ids() {
                let Some(config) = group.graph.task(&task_id).map(|t| t.config.clone()) else {
                    continue;
                };
                if let RebuildDecision::NoRebuildRequired(cause) =
                    decide(self.history.as_ref(), &config)
                {
                    if let Ok(Some(old)) = group
                        .graph
                        .set_status(&task_id, BuildStatus::RejectedAlreadyBuilt)
                    {
                        if let Some(task) = group.graph.task_mut(&task_id) {
                            task.no_rebuild_cause = Some(cause);
                        }
                        klog_debug!("{} already built by {}, skipping", config, cause);
                        events.push(CoordinationEvent::TaskStatusChanged {
                            group_id,
                            task_id,
                            old,
                            new: BuildStatus::RejectedAlreadyBuilt,
                        });
                    }
                }
            }
        }

        let mut wave = Vec::new();
        for task_id in propagate::submission_candidates(&group.graph, &group.pending_submit) {
            let config = group.graph.task(&task_id).map(|t| t.config.clone());
            if let Some(config) = config {
                group.pending_submit.insert(task_id);
                wave.push((task_id, config));
            }
        }

        if let Some((old, new)) = group.refresh_status() {
            events.push(CoordinationEvent::GroupStatusChanged { group_id, old, new });
        }

        let member_ids = group.graph.task_ids();
        let token = group.cancel_token.clone();
        klog!(
            "group build {} accepted: {} tasks, {} in first wave",
            group_id.short(),
            member_ids.len(),
            wave.len()
        );

        self.groups
            .write()
            .await
            .insert(group_id, Arc::new(RwLock::new(group)));
        {
            let mut task_index = self.task_index.write().await;
            for task_id in &member_ids {
                task_index.insert(*task_id, group_id);
            }
        }

        for event in events {
            let _ = self.event_tx.send(event).await;
        }
        for (task_id, config) in wave {
            self.spawn_submission(group_id, task_id, config, token.clone());
        }

        Ok(group_id)
    }

    /// Submit a single configuration, expanding its dependencies.
    ///
    /// Runs through the same machinery as a group submission.
    pub async fn submit_build(
        &self,
        root: ConfigRef,
        options: GroupBuildOptions,
    ) -> Result<GroupBuildId> {
        self.submit_group_build(vec![root], options).await
    }

    /// Ingest one asynchronous state report from the remote engine.
    ///
    /// Delivery is at-least-once and may be out of order across tasks.
    /// A protocol-invalid `(state, stop)` pair is logged and returned as
    /// an error without mutating any task; an unknown remote id is
    /// logged and dropped; a re-delivered terminal status is a no-op.
    pub async fn on_task_report(
        &self,
        remote_id: &RemoteTaskId,
        state: ExecutionState,
        stop: StopFlag,
    ) -> Result<()> {
        let status = match translate(state, stop) {
            Ok(status) => status,
            Err(e) => {
                klog_error!("dropping protocol-invalid report for {}: {}", remote_id, e);
                return Err(e);
            }
        };

        let target = self.remote_index.read().await.get(remote_id).copied();
        let Some((group_id, task_id)) = target else {
            klog_warn!("report for unknown remote task {}", remote_id);
            return Ok(());
        };
        let Some(group) = self.group_handle(&group_id).await else {
            klog_warn!("report for vanished group {}", group_id.short());
            return Ok(());
        };

        let mut events = Vec::new();
        let mut wave = Vec::new();
        let token;
        {
            let mut g = group.write().await;
            let old = match g.graph.set_status(&task_id, status) {
                Ok(Some(old)) => old,
                Ok(None) => {
                    klog_debug!("duplicate report for task {}, ignoring", task_id.short());
                    return Ok(());
                }
                Err(e) => {
                    klog_warn!("dropping report for task {}: {}", task_id.short(), e);
                    return Ok(());
                }
            };
            klog_debug!("task {}: {} -> {}", task_id.short(), old, status);
            events.push(CoordinationEvent::TaskStatusChanged {
                group_id,
                task_id,
                old,
                new: status,
            });

            if status.is_success() {
                if !g.cancel_requested {
                    for unlocked in
                        propagate::unlocked_dependants(&g.graph, &task_id, &g.pending_submit)
                    {
                        let config = g.graph.task(&unlocked).map(|t| t.config.clone());
                        if let Some(config) = config {
                            g.pending_submit.insert(unlocked);
                            wave.push((unlocked, config));
                        }
                    }
                }
            } else if status.is_failure() {
                for (id, old, new) in propagate::cascade_failure(&mut g.graph, &task_id) {
                    events.push(CoordinationEvent::TaskStatusChanged {
                        group_id,
                        task_id: id,
                        old,
                        new,
                    });
                }
            }

            if let Some((old, new)) = g.refresh_status() {
                klog!("group {}: {} -> {}", group_id.short(), old, new);
                events.push(CoordinationEvent::GroupStatusChanged { group_id, old, new });
            }
            token = g.cancel_token.clone();
        }

        for event in events {
            let _ = self.event_tx.send(event).await;
        }
        for (task_id, config) in wave {
            self.spawn_submission(group_id, task_id, config, token.clone());
        }
        Ok(())
    }

    /// Ingest a report struct; see [`Self::on_task_report`].
    pub async fn on_report(&self, report: RemoteTaskReport) -> Result<()> {
        self.on_task_report(&report.remote_id, report.state, report.stop)
            .await
    }

    /// Cancel a whole group build.
    ///
    /// Never-submitted members transition to `CANCELLED` synchronously;
    /// submitted members get a cancel request sent to the engine and
    /// change status only once the engine reports back. Idempotent.
    /// Returns whether the group existed and was non-terminal.
    pub async fn cancel_group_build(&self, group_id: &GroupBuildId) -> Result<bool> {
        let Some(group) = self.group_handle(group_id).await else {
            return Ok(false);
        };

        let mut events = Vec::new();
        let mut remote_cancels = Vec::new();
        let was_active;
        {
            let mut g = group.write().await;
            was_active = !g.status.is_terminal();
            if was_active {
                g.cancel_requested = true;
                g.cancel_token.cancel();
                klog!("cancelling group {}", group_id.short());

                for task_id in g.graph.task_ids() {
                    let state = g
                        .graph
                        .task(&task_id)
                        .map(|t| (t.status.is_terminal(), t.remote_id.clone()));
                    let Some((terminal, remote_id)) = state else {
                        continue;
                    };
                    if terminal {
                        continue;
                    }
                    if let Some(remote_id) = remote_id {
                        remote_cancels.push(remote_id);
                    } else {
                        g.pending_submit.remove(&task_id);
                        if let Ok(Some(old)) = g.graph.set_status(&task_id, BuildStatus::Cancelled)
                        {
                            events.push(CoordinationEvent::TaskStatusChanged {
                                group_id: *group_id,
                                task_id,
                                old,
                                new: BuildStatus::Cancelled,
                            });
                        }
                    }
                }

                if let Some((old, new)) = g.refresh_status() {
                    events.push(CoordinationEvent::GroupStatusChanged {
                        group_id: *group_id,
                        old,
                        new,
                    });
                }
            }
        }

        for event in events {
            let _ = self.event_tx.send(event).await;
        }
        let cancels = remote_cancels
            .iter()
            .map(|remote_id| self.engine.request_cancel(remote_id));
        for (remote_id, result) in remote_cancels.iter().zip(futures::future::join_all(cancels).await)
        {
            if let Err(e) = result {
                klog_warn!("cancel request for {} failed: {}", remote_id, e);
            }
        }

        Ok(was_active)
    }

    /// Cancel a single task.
    ///
    /// A never-submitted task transitions to `CANCELLED` synchronously
    /// and its dependants cascade to `REJECTED_FAILED_DEPENDENCIES`; a
    /// submitted task gets a cancel request sent to the engine.
    /// Idempotent. Returns whether the task existed and was non-terminal.
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<bool> {
        let group_id = self.task_index.read().await.get(task_id).copied();
        let Some(group_id) = group_id else {
            return Ok(false);
        };
        let Some(group) = self.group_handle(&group_id).await else {
            return Ok(false);
        };

        let mut events = Vec::new();
        let mut remote_cancel = None;
        let was_active;
        {
            let mut g = group.write().await;
            let Some(task) = g.graph.task(task_id) else {
                return Ok(false);
            };
            was_active = !task.status.is_terminal();
            if was_active {
                if let Some(remote_id) = task.remote_id.clone() {
                    remote_cancel = Some(remote_id);
                } else {
                    g.pending_submit.remove(task_id);
                    if let Ok(Some(old)) = g.graph.set_status(task_id, BuildStatus::Cancelled) {
                        events.push(CoordinationEvent::TaskStatusChanged {
                            group_id,
                            task_id: *task_id,
                            old,
                            new: BuildStatus::Cancelled,
                        });
                        for (id, old, new) in propagate::cascade_failure(&mut g.graph, task_id) {
                            events.push(CoordinationEvent::TaskStatusChanged {
                                group_id,
                                task_id: id,
                                old,
                                new,
                            });
                        }
                    }
                    if let Some((old, new)) = g.refresh_status() {
                        events.push(CoordinationEvent::GroupStatusChanged { group_id, old, new });
                    }
                }
            }
        }

        for event in events {
            let _ = self.event_tx.send(event).await;
        }
        if let Some(remote_id) = remote_cancel {
            if let Err(e) = self.engine.request_cancel(&remote_id).await {
                klog_warn!("cancel request for {} failed: {}", remote_id, e);
            }
        }

        Ok(was_active)
    }

    /// Current aggregate status of a group.
    pub async fn group_status(&self, group_id: &GroupBuildId) -> Option<GroupStatus> {
        let group = self.group_handle(group_id).await?;
        let status = group.read().await.status;
        Some(status)
    }

    /// Snapshot of a group's member tasks, discovery order.
    pub async fn group_tasks(&self, group_id: &GroupBuildId) -> Option<Vec<BuildTask>> {
        let group = self.group_handle(group_id).await?;
        let tasks = group.read().await.graph.tasks().cloned().collect();
        Some(tasks)
    }

    /// Current status of a single task.
    pub async fn task_status(&self, task_id: &TaskId) -> Option<BuildStatus> {
        let group_id = self.task_index.read().await.get(task_id).copied()?;
        let group = self.group_handle(&group_id).await?;
        let status = group.read().await.graph.task(task_id).map(|t| t.status);
        status
    }

    async fn group_handle(&self, group_id: &GroupBuildId) -> Option<Arc<RwLock<GroupBuild>>> {
        self.groups.read().await.get(group_id).cloned()
    }

    fn spawn_submission(
        &self,
        group_id: GroupBuildId,
        task_id: TaskId,
        config: ConfigRef,
        token: CancellationToken,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            this.run_submission(group_id, task_id, config, token).await;
        });
    }

    async fn run_submission(
        &self,
        group_id: GroupBuildId,
        task_id: TaskId,
        config: ConfigRef,
        token: CancellationToken,
    ) {
        klog_debug!("submitting {} ({})", config, task_id.short());
        match submit_with_retry(self.engine.as_ref(), &task_id, &config, &self.retry, &token).await
        {
            Ok(remote_id) => {
                // Index first: a fast engine may report before the task
                // record is updated, and the index is what resolves it.
                self.remote_index
                    .write()
                    .await
                    .insert(remote_id.clone(), (group_id, task_id));

                let mut cancel_after = None;
                if let Some(group) = self.group_handle(&group_id).await {
                    let mut g = group.write().await;
                    g.pending_submit.remove(&task_id);
                    let mut terminal = false;
                    if let Some(task) = g.graph.task_mut(&task_id) {
                        task.record_submission(remote_id.clone());
                        terminal = task.status.is_terminal();
                    }
                    // Cancelled while the submission was in flight: the
                    // engine now runs a task nobody wants.
                    if g.cancel_requested || terminal {
                        cancel_after = Some(remote_id.clone());
                    }
                }
                if let Some(remote_id) = cancel_after {
                    if let Err(e) = self.engine.request_cancel(&remote_id).await {
                        klog_warn!("cancel request for {} failed: {}", remote_id, e);
                    }
                }
            }
            Err(Error::SubmissionAborted) => {
                // Never reached the engine; cancellation is synchronous.
                self.finish_locally(group_id, task_id, BuildStatus::Cancelled)
                    .await;
            }
            Err(e) => {
                klog_error!("submission of {} failed: {}", config, e);
                self.finish_locally(group_id, task_id, BuildStatus::SystemError)
                    .await;
            }
        }
    }

    /// Apply a locally decided terminal status (no remote report involved)
    /// and run the failure cascade.
    async fn finish_locally(&self, group_id: GroupBuildId, task_id: TaskId, status: BuildStatus) {
        let Some(group) = self.group_handle(&group_id).await else {
            return;
        };

        let mut events = Vec::new();
        {
            let mut g = group.write().await;
            g.pending_submit.remove(&task_id);
            match g.graph.set_status(&task_id, status) {
                Ok(Some(old)) => {
                    events.push(CoordinationEvent::TaskStatusChanged {
                        group_id,
                        task_id,
                        old,
                        new: status,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    klog_warn!("task {} already terminal: {}", task_id.short(), e);
                }
            }
            if status.is_failure() {
                for (id, old, new) in propagate::cascade_failure(&mut g.graph, &task_id) {
                    events.push(CoordinationEvent::TaskStatusChanged {
                        group_id,
                        task_id: id,
                        old,
                        new,
                    });
                }
            }
            if let Some((old, new)) = g.refresh_status() {
                klog!("group {}: {} -> {}", group_id.short(), old, new);
                events.push(CoordinationEvent::GroupStatusChanged { group_id, old, new });
            }
        }

        for event in events {
            let _ = self.event_tx.send(event).await;
        }
    }
}

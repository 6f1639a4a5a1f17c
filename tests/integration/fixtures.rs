//! Test fixtures for integration tests.
//!
//! Provides a scripted remote engine, a table-backed dependency
//! resolver, and a harness wiring them into a coordinator with an
//! event channel.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use kiln::core::rebuild::InMemoryBuildHistory;
use kiln::core::translate::{ExecutionState, StopFlag};
use kiln::core::DependencyResolver;
use kiln::{
    BuildCoordinator, BuildStatus, BuildTask, ConfigRef, CoordinationEvent, Error, GroupBuildId,
    RemoteEngine, RemoteTaskId, Result, RetryPolicy, TaskId,
};

/// Shorthand for a configuration pinned at revision r1.
pub fn cfg(name: &str) -> ConfigRef {
    ConfigRef::new(name, "r1")
}

/// Dependency resolver backed by a fixed table.
pub struct StaticResolver {
    deps: HashMap<ConfigRef, Vec<ConfigRef>>,
}

impl StaticResolver {
    pub fn new(entries: &[(&str, &[&str])]) -> Self {
        let deps = entries
            .iter()
            .map(|(name, dep_names)| {
                (
                    cfg(name),
                    dep_names.iter().map(|d| cfg(d)).collect::<Vec<_>>(),
                )
            })
            .collect();
        Self { deps }
    }
}

impl DependencyResolver for StaticResolver {
    fn direct_dependencies(&self, config: &ConfigRef) -> Result<Vec<ConfigRef>> {
        self.deps
            .get(config)
            .cloned()
            .ok_or_else(|| Error::UnknownConfiguration(config.to_string()))
    }
}

/// Scripted remote engine.
///
/// Records every submission and cancel request, assigns sequential
/// remote ids, and can be gated so submissions block until released —
/// useful for exercising cancel-before-submission paths.
pub struct MockEngine {
    submissions: Mutex<Vec<(TaskId, ConfigRef, RemoteTaskId)>>,
    cancel_requests: Mutex<Vec<RemoteTaskId>>,
    counter: AtomicU32,
    gate_rx: watch::Receiver<bool>,
    gate_tx: watch::Sender<bool>,
}

impl MockEngine {
    /// Engine that accepts submissions immediately.
    pub fn new() -> Self {
        Self::with_gate(true)
    }

    /// Engine whose submissions block until [`MockEngine::release`].
    pub fn gated() -> Self {
        Self::with_gate(false)
    }

    fn with_gate(open: bool) -> Self {
        let (gate_tx, gate_rx) = watch::channel(open);
        Self {
            submissions: Mutex::new(Vec::new()),
            cancel_requests: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
            gate_rx,
            gate_tx,
        }
    }

    /// Open the gate: blocked and future submissions proceed.
    pub fn release(&self) {
        let _ = self.gate_tx.send(true);
    }

    pub fn submissions(&self) -> Vec<(TaskId, ConfigRef, RemoteTaskId)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn cancel_requests(&self) -> Vec<RemoteTaskId> {
        self.cancel_requests.lock().unwrap().clone()
    }

    pub fn remote_id_for(&self, config: &ConfigRef) -> Option<RemoteTaskId> {
        self.submissions()
            .iter()
            .find(|(_, c, _)| c == config)
            .map(|(_, _, id)| id.clone())
    }

    pub fn submitted_configs(&self) -> Vec<ConfigRef> {
        self.submissions()
            .iter()
            .map(|(_, config, _)| config.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteEngine for MockEngine {
    async fn submit(&self, task_id: &TaskId, config: &ConfigRef) -> Result<RemoteTaskId> {
        let mut gate = self.gate_rx.clone();
        while !*gate.borrow() {
            gate.changed()
                .await
                .map_err(|_| Error::RemoteTransport("engine gate dropped".to_string()))?;
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let remote_id = RemoteTaskId(format!("remote-{}", n));
        self.submissions
            .lock()
            .unwrap()
            .push((*task_id, config.clone(), remote_id.clone()));
        Ok(remote_id)
    }

    async fn request_cancel(&self, remote_id: &RemoteTaskId) -> Result<()> {
        self.cancel_requests.lock().unwrap().push(remote_id.clone());
        Ok(())
    }
}

/// A coordinator wired to a scripted engine and an in-memory history.
pub struct CoordinatorHarness {
    pub coordinator: BuildCoordinator,
    pub engine: Arc<MockEngine>,
    pub history: Arc<InMemoryBuildHistory>,
    pub event_rx: mpsc::Receiver<CoordinationEvent>,
}

impl CoordinatorHarness {
    pub fn new(engine: MockEngine, resolver: StaticResolver) -> Self {
        let engine = Arc::new(engine);
        let history = Arc::new(InMemoryBuildHistory::new());
        let (event_tx, event_rx) = mpsc::channel(256);
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        };
        let coordinator = BuildCoordinator::new(
            Arc::clone(&engine) as Arc<dyn RemoteEngine>,
            Arc::new(resolver),
            Arc::clone(&history) as Arc<dyn kiln::core::BuildHistory>,
            retry,
            event_tx,
        );
        Self {
            coordinator,
            engine,
            history,
            event_rx,
        }
    }

    /// Wait until the engine has seen `n` submissions.
    pub async fn wait_submissions(&self, n: usize) {
        let engine = Arc::clone(&self.engine);
        wait_until(move || engine.submission_count() == n, "submission count").await;
    }

    /// Report a successful build for an already-submitted configuration.
    pub async fn report_success(&self, config: &ConfigRef) {
        let remote_id = self
            .engine
            .remote_id_for(config)
            .unwrap_or_else(|| panic!("{} was never submitted", config));
        self.coordinator
            .on_task_report(&remote_id, ExecutionState::Successful, StopFlag::None)
            .await
            .unwrap();
    }

    /// Report a failed build for an already-submitted configuration.
    pub async fn report_failure(&self, config: &ConfigRef) {
        let remote_id = self
            .engine
            .remote_id_for(config)
            .unwrap_or_else(|| panic!("{} was never submitted", config));
        self.coordinator
            .on_task_report(&remote_id, ExecutionState::Failed, StopFlag::None)
            .await
            .unwrap();
    }

    /// Snapshot of a member task by configuration name.
    pub async fn task_for(&self, group_id: &GroupBuildId, name: &str) -> BuildTask {
        self.coordinator
            .group_tasks(group_id)
            .await
            .expect("group exists")
            .into_iter()
            .find(|t| t.config == cfg(name))
            .unwrap_or_else(|| panic!("no task for configuration {}", name))
    }

    /// Drain all currently queued events.
    pub fn drain_events(&mut self) -> Vec<CoordinationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Count drained task transitions into a given status.
    pub fn count_transitions_to(events: &[CoordinationEvent], status: BuildStatus) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, CoordinationEvent::TaskStatusChanged { new, .. } if *new == status))
            .count()
    }
}

/// Poll a condition until it holds, panicking after a 2s budget.
pub async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

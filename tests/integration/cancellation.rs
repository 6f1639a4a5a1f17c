//! Cancellation semantics: group-level and per-task, before and after
//! remote submission.

use kiln::{BuildStatus, GroupBuildOptions, GroupStatus};

use crate::fixtures::{cfg, CoordinatorHarness, MockEngine, StaticResolver};

/// Given a group where no task reached the engine yet (gated engine)
/// When the group is cancelled
/// Then every member transitions to CANCELLED synchronously
#[tokio::test]
async fn test_cancel_group_before_any_submission() {
    let resolver = StaticResolver::new(&[("a", &[]), ("b", &["a"])]);
    let h = CoordinatorHarness::new(MockEngine::gated(), resolver);

    let group_id = h
        .coordinator
        .submit_group_build(vec![cfg("b")], GroupBuildOptions::default())
        .await
        .unwrap();

    let cancelled = h.coordinator.cancel_group_build(&group_id).await.unwrap();
    assert!(cancelled);

    for name in ["a", "b"] {
        assert_eq!(
            h.task_for(&group_id, name).await.status,
            BuildStatus::Cancelled
        );
    }
    assert_eq!(
        h.coordinator.group_status(&group_id).await,
        Some(GroupStatus::Cancelled)
    );

    // Opening the gate afterwards must not resurrect anything
    h.engine.release();
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(
        h.coordinator.group_status(&group_id).await,
        Some(GroupStatus::Cancelled)
    );
}

/// Given a group with one member running remotely and one waiting
/// When the group is cancelled
/// Then the waiting member cancels synchronously, the running member
/// gets a remote cancel request and only finishes on the engine's report
#[tokio::test]
async fn test_cancel_group_with_remote_member() {
    let resolver = StaticResolver::new(&[("a", &[]), ("b", &["a"])]);
    let h = CoordinatorHarness::new(MockEngine::new(), resolver);

    let group_id = h
        .coordinator
        .submit_group_build(vec![cfg("b")], GroupBuildOptions::default())
        .await
        .unwrap();
    h.wait_submissions(1).await;
    let remote_a = h.engine.remote_id_for(&cfg("a")).unwrap();

    assert!(h.coordinator.cancel_group_build(&group_id).await.unwrap());

    assert_eq!(
        h.task_for(&group_id, "b").await.status,
        BuildStatus::Cancelled
    );
    assert_eq!(h.engine.cancel_requests(), vec![remote_a.clone()]);
    // Cancellation of a running task is asynchronous
    assert_eq!(
        h.coordinator.group_status(&group_id).await,
        Some(GroupStatus::Building)
    );

    h.coordinator
        .on_task_report(
            &remote_a,
            kiln::core::ExecutionState::Stopped,
            kiln::core::StopFlag::Cancelled,
        )
        .await
        .unwrap();

    assert_eq!(
        h.task_for(&group_id, "a").await.status,
        BuildStatus::Cancelled
    );
    assert_eq!(
        h.coordinator.group_status(&group_id).await,
        Some(GroupStatus::Cancelled)
    );
}

/// Cancelling a group twice reports active both times while members are
/// still winding down, and performs no duplicate transitions.
#[tokio::test]
async fn test_cancel_group_idempotent() {
    let resolver = StaticResolver::new(&[("a", &[]), ("b", &["a"])]);
    let mut h = CoordinatorHarness::new(MockEngine::gated(), resolver);

    let group_id = h
        .coordinator
        .submit_group_build(vec![cfg("b")], GroupBuildOptions::default())
        .await
        .unwrap();

    assert!(h.coordinator.cancel_group_build(&group_id).await.unwrap());
    h.drain_events();

    // Group is terminal now; the second cancel is a no-op
    assert!(!h.coordinator.cancel_group_build(&group_id).await.unwrap());
    assert!(h.drain_events().is_empty());
}

/// Cancelling one waiting task rejects its dependants but leaves
/// unrelated siblings alone.
#[tokio::test]
async fn test_cancel_task_scopes_to_dependants() {
    let resolver = StaticResolver::new(&[
        ("base", &[]),
        ("left", &["base"]),
        ("right", &["base"]),
        ("top", &["left"]),
    ]);
    let h = CoordinatorHarness::new(MockEngine::new(), resolver);

    let group_id = h
        .coordinator
        .submit_group_build(vec![cfg("top"), cfg("right")], GroupBuildOptions::default())
        .await
        .unwrap();
    h.wait_submissions(1).await;

    let left_id = h.task_for(&group_id, "left").await.id;
    assert!(h.coordinator.cancel_task(&left_id).await.unwrap());

    assert_eq!(
        h.task_for(&group_id, "left").await.status,
        BuildStatus::Cancelled
    );
    assert_eq!(
        h.task_for(&group_id, "top").await.status,
        BuildStatus::RejectedFailedDependencies
    );
    // right is untouched and still proceeds once base succeeds
    assert!(!h.task_for(&group_id, "right").await.status.is_terminal());

    h.report_success(&cfg("base")).await;
    h.wait_submissions(2).await;
    assert!(h.engine.remote_id_for(&cfg("right")).is_some());
}

/// A cancelled group with no successes and no errors aggregates to
/// CANCELLED even when cancellation raced ahead of any execution.
#[tokio::test]
async fn test_cancelled_group_aggregate_without_successes() {
    let resolver = StaticResolver::new(&[("x", &[]), ("y", &[])]);
    let h = CoordinatorHarness::new(MockEngine::gated(), resolver);

    let group_id = h
        .coordinator
        .submit_group_build(vec![cfg("x"), cfg("y")], GroupBuildOptions::default())
        .await
        .unwrap();

    h.coordinator.cancel_group_build(&group_id).await.unwrap();
    assert_eq!(
        h.coordinator.group_status(&group_id).await,
        Some(GroupStatus::Cancelled)
    );
}

/// A group where one member succeeded before the cancel still ends
/// CANCELLED (no errors, not fully successful).
#[tokio::test]
async fn test_cancel_after_partial_success() {
    let resolver = StaticResolver::new(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
    let h = CoordinatorHarness::new(MockEngine::new(), resolver);

    let group_id = h
        .coordinator
        .submit_group_build(vec![cfg("c")], GroupBuildOptions::default())
        .await
        .unwrap();
    h.wait_submissions(1).await;
    h.report_success(&cfg("a")).await;
    h.wait_submissions(2).await;
    let remote_b = h.engine.remote_id_for(&cfg("b")).unwrap();

    h.coordinator.cancel_group_build(&group_id).await.unwrap();
    h.coordinator
        .on_task_report(
            &remote_b,
            kiln::core::ExecutionState::Stopped,
            kiln::core::StopFlag::Cancelled,
        )
        .await
        .unwrap();

    assert_eq!(h.task_for(&group_id, "a").await.status, BuildStatus::Done);
    assert_eq!(
        h.task_for(&group_id, "c").await.status,
        BuildStatus::Cancelled
    );
    assert_eq!(
        h.coordinator.group_status(&group_id).await,
        Some(GroupStatus::Cancelled)
    );
}

//! Rebuild avoidance: skipping configurations that already have an
//! equivalent successful build.

use kiln::core::task::BuildRef;
use kiln::{BuildStatus, GroupBuildOptions, GroupStatus};

use crate::fixtures::{cfg, CoordinatorHarness, MockEngine, StaticResolver};

fn chain_resolver() -> StaticResolver {
    StaticResolver::new(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])])
}

/// Given a has a prior successful build at the identical revision
/// When the a/b/c group is submitted
/// Then a is REJECTED_ALREADY_BUILT with the cause recorded and b, c
/// proceed exactly as if a had succeeded
#[tokio::test]
async fn test_prior_build_short_circuits_root() {
    let h = CoordinatorHarness::new(MockEngine::new(), chain_resolver());
    let cause = BuildRef::new();
    h.history.record(cfg("a"), cause);

    let group_id = h
        .coordinator
        .submit_group_build(vec![cfg("c")], GroupBuildOptions::default())
        .await
        .unwrap();

    // b goes straight to the engine; a never does
    h.wait_submissions(1).await;
    assert_eq!(h.engine.submitted_configs(), vec![cfg("b")]);

    let a = h.task_for(&group_id, "a").await;
    assert_eq!(a.status, BuildStatus::RejectedAlreadyBuilt);
    assert_eq!(a.no_rebuild_cause, Some(cause));
    assert!(a.remote_id.is_none());

    h.report_success(&cfg("b")).await;
    h.wait_submissions(2).await;
    h.report_success(&cfg("c")).await;

    assert_eq!(
        h.coordinator.group_status(&group_id).await,
        Some(GroupStatus::Done)
    );
}

/// An already-built member counts as success in the aggregate: a group
/// of entirely reused builds is DONE without touching the engine.
#[tokio::test]
async fn test_fully_reused_group_done_without_engine() {
    let h = CoordinatorHarness::new(MockEngine::new(), chain_resolver());
    for name in ["a", "b", "c"] {
        h.history.record(cfg(name), BuildRef::new());
    }

    let group_id = h
        .coordinator
        .submit_group_build(vec![cfg("c")], GroupBuildOptions::default())
        .await
        .unwrap();

    assert_eq!(
        h.coordinator.group_status(&group_id).await,
        Some(GroupStatus::Done)
    );
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(h.engine.submission_count(), 0);
}

/// Force rebuild bypasses the history check for every member.
#[tokio::test]
async fn test_force_rebuild_builds_everything() {
    let h = CoordinatorHarness::new(MockEngine::new(), chain_resolver());
    for name in ["a", "b", "c"] {
        h.history.record(cfg(name), BuildRef::new());
    }

    let group_id = h
        .coordinator
        .submit_group_build(
            vec![cfg("c")],
            GroupBuildOptions {
                name: Some("nightly-rebuild".to_string()),
                force_rebuild: true,
            },
        )
        .await
        .unwrap();

    h.wait_submissions(1).await;
    assert_eq!(h.engine.submitted_configs(), vec![cfg("a")]);
    assert_eq!(
        h.task_for(&group_id, "a").await.status,
        BuildStatus::New
    );
}

/// The identity criterion is exact: a different revision of an
/// already-built configuration still builds.
#[tokio::test]
async fn test_revision_mismatch_still_builds() {
    let resolver = StaticResolver::new(&[("a", &[])]);
    let h = CoordinatorHarness::new(MockEngine::new(), resolver);
    h.history
        .record(kiln::ConfigRef::new("a", "older-rev"), BuildRef::new());

    h.coordinator
        .submit_group_build(vec![cfg("a")], GroupBuildOptions::default())
        .await
        .unwrap();

    h.wait_submissions(1).await;
    assert_eq!(h.engine.submitted_configs(), vec![cfg("a")]);
}

/// The rebuild decision is made once, before submission: recording a
/// build mid-flight does not retroactively skip members.
#[tokio::test]
async fn test_decision_not_revisited_mid_group() {
    let resolver = StaticResolver::new(&[("a", &[]), ("b", &["a"])]);
    let h = CoordinatorHarness::new(MockEngine::new(), resolver);

    let group_id = h
        .coordinator
        .submit_group_build(vec![cfg("b")], GroupBuildOptions::default())
        .await
        .unwrap();
    h.wait_submissions(1).await;

    // History learns about b only after the group was accepted
    h.history.record(cfg("b"), BuildRef::new());
    h.report_success(&cfg("a")).await;
    h.wait_submissions(2).await;

    assert!(h.engine.remote_id_for(&cfg("b")).is_some());
    let b = h.task_for(&group_id, "b").await;
    assert!(b.no_rebuild_cause.is_none());
}

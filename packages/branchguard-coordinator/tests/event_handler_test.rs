//! `indexing.completed` handling end to end: lock release, auto-switch and
//! auto-merge.

mod common;

use async_trait::async_trait;
use branchguard_coordinator::storage::{BranchStatus, IndexType, LockType, ShadowIndexState};
use branchguard_coordinator::{
    AcquireLockRequest, IndexingEvent, LockManager, MergeConflictChecker, MergeDecision,
    SkipReason,
};
use common::{harness, harness_with, write_index, Options};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, OnceLock};

fn event(payload: serde_json::Value) -> IndexingEvent {
    IndexingEvent::from_value(&payload).unwrap()
}

#[tokio::test]
async fn test_successful_indexing_releases_locks_and_auto_merges() {
    let h = harness();
    let locks = h.coordinator.locks();
    locks.lock_for_indexing("main", "indexer", None, None, "nightly").await.unwrap();

    let outcome = h
        .coordinator
        .events()
        .handle(event(json!({
            "branch_name": "main",
            "status": "success",
            "records_indexed": 1200,
            "service_name": "indexer",
            "validation_results": {"passed": true, "checked": 1200}
        })))
        .await
        .unwrap();

    assert_eq!(outcome.mode, "traditional");
    assert!(outcome.indexing_succeeded);
    assert_eq!(outcome.merge, Some(MergeDecision::Merge));
    assert_eq!(outcome.branch_state, Some(BranchStatus::Active));
    assert!(locks.list_active_locks(Some("main")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_validation_leaves_branch_ready() {
    let h = harness();
    let locks = h.coordinator.locks();
    locks.lock_for_indexing("main", "indexer", None, None, "nightly").await.unwrap();

    let outcome = h
        .coordinator
        .events()
        .handle(event(json!({
            "branch_name": "main",
            "status": "success",
            "validation_results": {"passed": false}
        })))
        .await
        .unwrap();

    assert_eq!(
        outcome.merge,
        Some(MergeDecision::Skip(SkipReason::ValidationFailed))
    );
    assert_eq!(outcome.branch_state, Some(BranchStatus::Ready));
    assert!(locks.list_active_locks(Some("main")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_validation_results_block_auto_merge() {
    let h = harness();
    h.coordinator
        .locks()
        .lock_for_indexing("main", "indexer", None, None, "nightly")
        .await
        .unwrap();

    let outcome = h
        .coordinator
        .events()
        .handle(event(json!({"branch_name": "main", "status": "success"})))
        .await
        .unwrap();
    assert_eq!(outcome.branch_state, Some(BranchStatus::Ready));
}

#[tokio::test]
async fn test_protected_branch_is_never_auto_merged() {
    let h = harness_with(Options {
        configure: Some(Box::new(|config| {
            config.auto_merge.protected_branches = vec!["main".to_string()]
        })),
        ..Options::default()
    });
    h.coordinator
        .locks()
        .lock_for_indexing("main", "indexer", None, None, "nightly")
        .await
        .unwrap();

    let outcome = h
        .coordinator
        .events()
        .handle(event(json!({
            "branch_name": "main",
            "status": "success",
            "validation_results": {"passed": true}
        })))
        .await
        .unwrap();
    assert_eq!(
        outcome.merge,
        Some(MergeDecision::Skip(SkipReason::ProtectedBranch))
    );
    assert_eq!(outcome.branch_state, Some(BranchStatus::Ready));
}

#[tokio::test]
async fn test_failure_event_puts_branch_in_error() {
    let h = harness();
    let locks = h.coordinator.locks();
    let types = vec!["object_type".to_string(), "link_type".to_string()];
    locks
        .lock_for_indexing("main", "indexer", Some(&types), None, "nightly")
        .await
        .unwrap();

    let outcome = h
        .coordinator
        .events()
        .handle(event(json!({
            "indexing_mode": "traditional",
            "branch_name": "main",
            "status": "failed",
            "error_message": "segment merge failed"
        })))
        .await
        .unwrap();

    assert!(!outcome.indexing_succeeded);
    assert_eq!(outcome.branch_state, Some(BranchStatus::Error));
    assert!(outcome.merge.is_none());

    let info = locks.get_branch_state("main").await.unwrap();
    assert!(info.active_locks.is_empty());
    assert_eq!(info.state.error_message.as_deref(), Some("segment merge failed"));
}

#[tokio::test]
async fn test_shadow_completion_auto_switches_and_merges() {
    let h = harness();
    let shadows = h.coordinator.shadows();
    let id = shadows
        .start_shadow_build("main", IndexType::FullText, &[], "indexer", None)
        .await
        .unwrap();
    let info = shadows.get_shadow_status(id).await.unwrap().unwrap();
    write_index(&info.shadow_index_path, &[("0.seg", "posting lists")]);

    let outcome = h
        .coordinator
        .events()
        .handle(event(json!({
            "indexing_mode": "shadow",
            "shadow_index_id": id,
            "branch_name": "main",
            "status": "success",
            "records_indexed": 10,
            "index_size_bytes": 13,
            "service_name": "indexer",
            "validation_results": {"passed": true}
        })))
        .await
        .unwrap();

    assert_eq!(outcome.mode, "shadow");
    let switch = outcome.switch.unwrap();
    assert!(switch.success, "{:?}", switch);
    assert_eq!(outcome.merge, Some(MergeDecision::Merge));
    assert_eq!(outcome.branch_state, Some(BranchStatus::Active));

    let info = shadows.get_shadow_status(id).await.unwrap().unwrap();
    assert_eq!(info.state, ShadowIndexState::Active);
    assert_eq!(info.record_count, Some(10));
    assert!(info.current_index_path.join("0.seg").exists());
}

#[tokio::test]
async fn test_shadow_completion_without_auto_switch_stays_built() {
    let h = harness_with(Options {
        configure: Some(Box::new(|config| config.events.auto_switch = false)),
        ..Options::default()
    });
    let shadows = h.coordinator.shadows();
    let id = shadows
        .start_shadow_build("main", IndexType::Vector, &[], "embedder", None)
        .await
        .unwrap();

    let outcome = h
        .coordinator
        .events()
        .handle(event(json!({
            "indexing_mode": "shadow",
            "shadow_index_id": id,
            "branch_name": "main",
            "status": "success",
            "records_indexed": 3
        })))
        .await
        .unwrap();

    assert!(outcome.switch.is_none());
    assert!(outcome.merge.is_none());
    assert_eq!(
        shadows.get_shadow_status(id).await.unwrap().unwrap().state,
        ShadowIndexState::Built
    );
}

#[tokio::test]
async fn test_shadow_failure_leaves_branch_untouched() {
    let h = harness();
    let shadows = h.coordinator.shadows();
    let locks = h.coordinator.locks();
    let id = shadows
        .start_shadow_build("main", IndexType::Graph, &[], "grapher", None)
        .await
        .unwrap();

    let outcome = h
        .coordinator
        .events()
        .handle(event(json!({
            "indexing_mode": "shadow",
            "shadow_index_id": id,
            "branch_name": "main",
            "status": "timeout"
        })))
        .await
        .unwrap();

    assert!(!outcome.indexing_succeeded);
    assert!(outcome.branch_state.is_none());
    let info = shadows.get_shadow_status(id).await.unwrap().unwrap();
    assert_eq!(info.state, ShadowIndexState::Failed);
    assert_eq!(
        info.error_message.as_deref(),
        Some("indexing reported status 'timeout'")
    );
    assert_eq!(
        locks.get_branch_state("main").await.unwrap().current_state(),
        BranchStatus::Active
    );
}

#[tokio::test]
async fn test_handle_raw_reports_malformed_payloads() {
    let h = harness();
    let events = h.coordinator.events();

    assert!(!events.handle_raw(&json!({"status": "success"})).await);
    assert!(!events.handle_raw(&json!("not an object")).await);
    assert!(
        !events
            .handle_raw(&json!({"indexing_mode": "shadow", "branch_name": "main", "status": "success"}))
            .await
    );
    assert!(
        events
            .handle_raw(&json!({"branch_name": "dev", "status": "success"}))
            .await
    );
}

/// Grabs an INDEXING lock while the merge is being evaluated, so the merge
/// itself finds the branch no longer READY.
#[derive(Default)]
struct RacingIndexer {
    locks: OnceLock<Arc<LockManager>>,
}

#[async_trait]
impl MergeConflictChecker for RacingIndexer {
    async fn has_conflicts(&self, branch_name: &str) -> anyhow::Result<bool> {
        if let Some(locks) = self.locks.get() {
            locks
                .acquire_lock(
                    AcquireLockRequest::new(branch_name, LockType::Indexing, "late-indexer")
                        .resource_type("link_type"),
                )
                .await?;
        }
        Ok(false)
    }
}

#[tokio::test]
async fn test_merge_that_cannot_apply_puts_branch_in_error() {
    let checker = Arc::new(RacingIndexer::default());
    let h = harness_with(Options {
        merge_checker: Some(checker.clone()),
        ..Options::default()
    });
    let locks = h.coordinator.locks();
    assert!(checker.locks.set(Arc::clone(locks)).is_ok());
    locks.lock_for_indexing("main", "indexer", None, None, "nightly").await.unwrap();

    let outcome = h
        .coordinator
        .events()
        .handle(event(json!({
            "branch_name": "main",
            "status": "success",
            "validation_results": {"passed": true}
        })))
        .await
        .unwrap();

    assert_eq!(outcome.merge, Some(MergeDecision::Merge));
    assert_eq!(outcome.branch_state, Some(BranchStatus::Error));

    let info = locks.get_branch_state("main").await.unwrap();
    assert!(info
        .state
        .error_message
        .unwrap()
        .starts_with("auto-merge failed"));

    // The lock taken during evaluation belongs to another job and survives.
    assert_eq!(info.active_locks.len(), 1);
    assert_eq!(info.active_locks[0].locked_by, "late-indexer");
    assert_eq!(
        info.active_locks[0].resource_type.as_deref(),
        Some("link_type")
    );
}

//! Lock grants, releases, sweeps and the branch states they drive.

mod common;

use branchguard_coordinator::storage::{BranchStatus, LockType};
use branchguard_coordinator::{
    AcquireLockRequest, AuditAction, Coordinator, CoordinatorConfig, CoordinatorError,
};
use chrono::Duration;
use common::harness;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_acquisitions_grant_at_most_one() {
    let h = harness();
    let locks = Arc::clone(h.coordinator.locks());

    let attempts = (0..24).map(|i| {
        let locks = Arc::clone(&locks);
        tokio::spawn(async move {
            let request = match i % 3 {
                0 => AcquireLockRequest::new("main", LockType::Indexing, format!("svc-{}", i)),
                1 => AcquireLockRequest::new("main", LockType::Manual, format!("user-{}", i))
                    .resource_type("object_type"),
                _ => AcquireLockRequest::new("main", LockType::SchemaChange, format!("ddl-{}", i))
                    .resource_type("object_type"),
            };
            locks.acquire_lock(request).await
        })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let granted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(granted, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            result,
            Err(CoordinatorError::LockConflict { .. })
        ));
    }
    assert_eq!(locks.list_active_locks(Some("main")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_independent_resource_types_and_branches_do_not_conflict() {
    let h = harness();
    let locks = h.coordinator.locks();

    for (branch, rt) in [("main", "object_type"), ("main", "link_type"), ("dev", "object_type")] {
        locks
            .acquire_lock(AcquireLockRequest::new(branch, LockType::Indexing, "svc").resource_type(rt))
            .await
            .unwrap();
    }
    assert_eq!(locks.list_active_locks(None).await.unwrap().len(), 3);
    assert_eq!(locks.list_active_locks(Some("main")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_backup_locks_share() {
    let h = harness();
    let locks = h.coordinator.locks();

    locks
        .acquire_lock(AcquireLockRequest::new("main", LockType::Backup, "backup-a"))
        .await
        .unwrap();
    locks
        .acquire_lock(AcquireLockRequest::new("main", LockType::Backup, "backup-b"))
        .await
        .unwrap();
    assert!(locks
        .acquire_lock(AcquireLockRequest::new("main", LockType::Maintenance, "ops"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let h = harness();
    let locks = h.coordinator.locks();
    let lock = locks
        .acquire_lock(AcquireLockRequest::new("main", LockType::Indexing, "svc"))
        .await
        .unwrap();

    assert!(locks.release_lock(lock.id, "svc").await.unwrap());
    let after_first = locks.get_branch_state("main").await.unwrap().state;

    assert!(!locks.release_lock(lock.id, "svc").await.unwrap());
    assert!(!locks.release_lock(uuid::Uuid::new_v4(), "svc").await.unwrap());

    let after_second = locks.get_branch_state("main").await.unwrap().state;
    assert_eq!(after_first.current_state, BranchStatus::Ready);
    assert_eq!(after_second.version, after_first.version);

    let stored = locks.get_lock_status(lock.id).await.unwrap().unwrap();
    assert!(!stored.is_active);
    assert_eq!(stored.released_by.as_deref(), Some("svc"));
}

#[tokio::test]
async fn test_partial_completion() {
    let h = harness();
    let locks = h.coordinator.locks();
    let types = vec!["object_type".to_string(), "link_type".to_string()];

    let granted = locks
        .lock_for_indexing("main", "svc", Some(&types), None, "schema migration")
        .await
        .unwrap();
    assert_eq!(granted.len(), 2);

    let object_type = vec!["object_type".to_string()];
    assert!(locks
        .complete_indexing("main", "svc", Some(&object_type))
        .await
        .unwrap());

    let info = locks.get_branch_state("main").await.unwrap();
    assert_eq!(info.current_state(), BranchStatus::LockedForWrite);
    assert_eq!(info.active_locks.len(), 1);
    assert_eq!(info.active_locks[0].resource_type.as_deref(), Some("link_type"));

    let link_type = vec!["link_type".to_string()];
    assert!(locks
        .complete_indexing("main", "svc", Some(&link_type))
        .await
        .unwrap());
    let info = locks.get_branch_state("main").await.unwrap();
    assert_eq!(info.current_state(), BranchStatus::Ready);
    assert!(info.active_locks.is_empty());

    assert!(!locks.complete_indexing("main", "svc", None).await.unwrap());
}

#[tokio::test]
async fn test_ttl_sweep_ignores_heartbeat_history() {
    let h = harness();
    let locks = h.coordinator.locks();
    let lock = locks
        .acquire_lock(
            AcquireLockRequest::new("main", LockType::Indexing, "switcher")
                .heartbeat(false)
                .timeout(Duration::seconds(10)),
        )
        .await
        .unwrap();
    assert!(lock.last_heartbeat.is_none());

    h.clock.advance(Duration::seconds(11));
    assert_eq!(locks.cleanup_heartbeat_expired_locks().await.unwrap(), 0);
    assert_eq!(locks.cleanup_expired_locks().await.unwrap(), 1);

    let stored = locks.get_lock_status(lock.id).await.unwrap().unwrap();
    assert!(!stored.is_active);
    assert_eq!(
        locks.get_branch_state("main").await.unwrap().current_state(),
        BranchStatus::Ready
    );
    assert!(h.audit.actions().contains(&AuditAction::LockExpired));
}

#[tokio::test]
async fn test_heartbeat_sweep_reaps_silent_holder_before_ttl() {
    let h = harness();
    let locks = h.coordinator.locks();
    let lock = locks
        .acquire_lock(
            AcquireLockRequest::new("main", LockType::Indexing, "indexer")
                .timeout(Duration::hours(2)),
        )
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(4));
    assert!(locks
        .send_heartbeat(lock.id, "indexer", "running", Some(&serde_json::json!({"pct": 40})))
        .await
        .unwrap());

    h.clock.advance(Duration::minutes(4));
    assert_eq!(locks.run_sweeps().await.unwrap().total(), 0);

    h.clock.advance(Duration::minutes(2));
    assert_eq!(locks.cleanup_expired_locks().await.unwrap(), 0);
    assert_eq!(locks.cleanup_heartbeat_expired_locks().await.unwrap(), 1);
    assert!(!locks.get_lock_status(lock.id).await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn test_ttl_wins_over_healthy_heartbeat() {
    let h = harness();
    let locks = h.coordinator.locks();
    let lock = locks
        .acquire_lock(
            AcquireLockRequest::new("main", LockType::Indexing, "indexer")
                .timeout(Duration::minutes(3)),
        )
        .await
        .unwrap();

    for _ in 0..4 {
        h.clock.advance(Duration::minutes(1));
        locks.send_heartbeat(lock.id, "indexer", "running", None).await.unwrap();
    }

    let report = locks.run_sweeps().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.heartbeat_expired, 0);
}

#[tokio::test]
async fn test_force_unlock_releases_everything() {
    let h = harness();
    let locks = h.coordinator.locks();
    locks
        .acquire_lock(AcquireLockRequest::new("main", LockType::Indexing, "svc").resource_type("a"))
        .await
        .unwrap();
    locks
        .acquire_lock(AcquireLockRequest::new("main", LockType::Manual, "alice").resource_type("b"))
        .await
        .unwrap();

    assert_eq!(locks.force_unlock("main", "admin", "stuck job").await.unwrap(), 2);
    assert_eq!(locks.force_unlock("main", "admin", "again").await.unwrap(), 0);

    let info = locks.get_branch_state("main").await.unwrap();
    assert!(info.active_locks.is_empty());
    assert_eq!(info.current_state(), BranchStatus::Ready);
}

#[tokio::test]
async fn test_retry_after_error() {
    let h = harness();
    let locks = h.coordinator.locks();
    locks.lock_for_indexing("main", "svc", None, None, "first").await.unwrap();
    locks.fail_indexing("main", "svc", "out of disk").await.unwrap();

    locks.lock_for_indexing("main", "svc", None, None, "retry").await.unwrap();
    let info = locks.get_branch_state("main").await.unwrap();
    assert_eq!(info.current_state(), BranchStatus::LockedForWrite);
    assert!(info.state.error_message.is_none());
}

#[tokio::test]
async fn test_error_needs_explicit_exit() {
    let h = harness();
    let locks = h.coordinator.locks();
    locks.fail_indexing("main", "svc", "corrupt").await.unwrap();

    assert_eq!(locks.run_sweeps().await.unwrap().total(), 0);
    assert_eq!(
        locks.get_branch_state("main").await.unwrap().current_state(),
        BranchStatus::Error
    );
    assert_eq!(
        locks.recover_branch("main", "ops", "checked").await.unwrap().current_state,
        BranchStatus::Active
    );
    assert!(matches!(
        locks.recover_branch("main", "ops", "twice").await,
        Err(CoordinatorError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_sqlite_state_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("branchguard.db");
    let config = CoordinatorConfig::default().with_base_path(dir.path().join("indexes"));

    let lock_id = {
        let coordinator = Coordinator::open_sqlite(config.clone(), &db).unwrap();
        let lock = coordinator
            .locks()
            .acquire_lock(
                AcquireLockRequest::new("main", LockType::Indexing, "svc").resource_type("object_type"),
            )
            .await
            .unwrap();
        lock.id
    };

    let coordinator = Coordinator::open_sqlite(config, &db).unwrap();
    let locks = coordinator.locks();
    let info = locks.get_branch_state("main").await.unwrap();
    assert_eq!(info.current_state(), BranchStatus::LockedForWrite);
    assert_eq!(info.active_locks[0].id, lock_id);

    assert!(locks
        .acquire_lock(
            AcquireLockRequest::new("main", LockType::Indexing, "other").resource_type("object_type"),
        )
        .await
        .is_err());
    assert!(locks.complete_indexing("main", "svc", None).await.unwrap());
    assert_eq!(
        locks.get_branch_state("main").await.unwrap().current_state(),
        BranchStatus::Ready
    );
}

//! Both adapters must agree on conflict and CAS semantics.

use branchguard_storage::{
    BranchLock, BranchStateRecord, BranchStatus, InMemoryStore, LockInsertOutcome, LockStore,
    LockType, SqliteStore,
};
use chrono::{Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;

fn stores() -> Vec<(&'static str, Arc<dyn LockStore>)> {
    vec![
        ("memory", Arc::new(InMemoryStore::new())),
        ("sqlite", Arc::new(SqliteStore::in_memory().unwrap())),
    ]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_grant_exactly_one() {
    for (name, store) in stores() {
        let attempts = (0..16).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let lock = BranchLock::resource_scoped(
                    "main",
                    LockType::Indexing,
                    "object_type",
                    format!("worker-{}", i),
                    "race",
                    Utc::now(),
                );
                store.insert_if_no_conflict(&lock).await.unwrap()
            })
        });

        let outcomes: Vec<LockInsertOutcome> = join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let granted = outcomes
            .iter()
            .filter(|o| matches!(o, LockInsertOutcome::Inserted))
            .count();

        assert_eq!(granted, 1, "{} granted {} locks", name, granted);
        assert_eq!(store.list_active_locks(Some("main")).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_sweep_queries_agree() {
    for (name, store) in stores() {
        let now = Utc::now();
        let past = now - Duration::hours(1);

        let expired = BranchLock::resource_scoped("main", LockType::Indexing, "a", "svc", "r", past)
            .with_expiry(now - Duration::seconds(1));
        let silent = BranchLock::resource_scoped("main", LockType::Indexing, "b", "svc", "r", past)
            .with_expiry(now + Duration::hours(1))
            .with_heartbeat(true);
        let healthy = BranchLock::resource_scoped("main", LockType::Indexing, "c", "svc", "r", now)
            .with_expiry(now + Duration::hours(1))
            .with_heartbeat(true);

        for lock in [&expired, &silent, &healthy] {
            store.insert_if_no_conflict(lock).await.unwrap();
        }

        let ttl: Vec<_> = store
            .find_expired_locks(now)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(ttl, vec![expired.id], "{}", name);

        let stale: Vec<_> = store
            .find_heartbeat_stale_locks(now, Duration::minutes(5))
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(stale, vec![silent.id], "{}", name);
    }
}

#[tokio::test]
async fn test_branch_state_cas_rejects_stale_writer() {
    for (name, store) in stores() {
        let initial = BranchStateRecord::new("feature", Utc::now());
        assert!(store.compare_and_swap_branch_state(&initial, 0).await.unwrap());

        let mut writer_a = store.get_branch_state("feature").await.unwrap().unwrap();
        let mut writer_b = writer_a.clone();

        writer_a.current_state = BranchStatus::LockedForWrite;
        writer_b.current_state = BranchStatus::Error;

        assert!(store
            .compare_and_swap_branch_state(&writer_a, writer_a.version)
            .await
            .unwrap());
        assert!(
            !store
                .compare_and_swap_branch_state(&writer_b, writer_b.version)
                .await
                .unwrap(),
            "{} accepted a stale write",
            name
        );

        let stored = store.get_branch_state("feature").await.unwrap().unwrap();
        assert_eq!(stored.current_state, BranchStatus::LockedForWrite);
    }
}

//! Store ports
//!
//! Adapters implement these against a single linearizable backend. The only
//! operations that must be atomic across records are
//! [`LockStore::insert_if_no_conflict`] and
//! [`ShadowIndexStore::insert_if_no_active_shadow`]; everything else is a
//! single-record read-modify-write.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::branch::BranchStateRecord;
use super::lock::BranchLock;
use super::shadow::{ShadowIndexInfo, ShadowIndexState};
use crate::Result;

/// Result of an atomic conflict-checked lock insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockInsertOutcome {
    Inserted,
    /// Nothing was written; these active locks overlap the request
    Conflict(Vec<BranchLock>),
}

/// Result of an atomic conflict-checked shadow insert
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowInsertOutcome {
    Inserted,
    /// Nothing was written; this non-terminal shadow already exists
    Conflict(Box<ShadowIndexInfo>),
}

/// Persistence for branch locks and branch state
#[async_trait]
pub trait LockStore: Send + Sync {
    // ═══════════════════════════════════════════════════════════════════════
    // Locks
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert `lock` unless an active lock on the same branch conflicts with it.
    ///
    /// Check and insert happen as one linearizable step with respect to every
    /// other call on the same branch.
    async fn insert_if_no_conflict(&self, lock: &BranchLock) -> Result<LockInsertOutcome>;

    /// Fetch a lock by id, active or not
    async fn get_lock(&self, lock_id: Uuid) -> Result<Option<BranchLock>>;

    /// Active locks, optionally restricted to one branch, oldest first
    async fn list_active_locks(&self, branch_name: Option<&str>) -> Result<Vec<BranchLock>>;

    /// Deactivate an active lock.
    ///
    /// Returns the deactivated lock, or `None` if it was absent or already
    /// inactive. Concurrent callers see at most one `Some`.
    async fn deactivate_lock(
        &self,
        lock_id: Uuid,
        released_by: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<BranchLock>>;

    /// Set `last_heartbeat` on an active, heartbeat-enabled lock.
    async fn record_heartbeat(&self, lock_id: Uuid, at: DateTime<Utc>) -> Result<bool>;

    /// Push `expires_at` forward from `max(expires_at, now)`.
    ///
    /// Returns the new deadline, or `None` if the lock is absent or inactive.
    async fn extend_expiry(
        &self,
        lock_id: Uuid,
        extension: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Active locks whose TTL deadline is at or before `now`
    async fn find_expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<BranchLock>>;

    /// Active heartbeat-enabled locks silent for longer than `timeout`
    async fn find_heartbeat_stale_locks(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<BranchLock>>;

    // ═══════════════════════════════════════════════════════════════════════
    // Branch state
    // ═══════════════════════════════════════════════════════════════════════

    async fn get_branch_state(&self, branch_name: &str) -> Result<Option<BranchStateRecord>>;

    async fn list_branch_states(&self) -> Result<Vec<BranchStateRecord>>;

    /// Write `record` if the stored version equals `expected_version`
    /// (0 = no record yet). On success the stored version becomes
    /// `expected_version + 1`; `record.version` is ignored.
    async fn compare_and_swap_branch_state(
        &self,
        record: &BranchStateRecord,
        expected_version: u64,
    ) -> Result<bool>;
}

/// Persistence for shadow index builds
#[async_trait]
pub trait ShadowIndexStore: Send + Sync {
    /// Insert `info` unless a non-terminal shadow exists for the same
    /// `(branch_name, index_type)`.
    async fn insert_if_no_active_shadow(&self, info: &ShadowIndexInfo)
        -> Result<ShadowInsertOutcome>;

    async fn get_shadow(&self, shadow_id: Uuid) -> Result<Option<ShadowIndexInfo>>;

    /// All shadows, any state, optionally restricted to one branch
    async fn list_shadows(&self, branch_name: Option<&str>) -> Result<Vec<ShadowIndexInfo>>;

    /// Replace the stored record if its state still equals `expected_state`.
    async fn compare_and_swap_shadow(
        &self,
        info: &ShadowIndexInfo,
        expected_state: ShadowIndexState,
    ) -> Result<bool>;

    async fn delete_shadow(&self, shadow_id: Uuid) -> Result<bool>;
}

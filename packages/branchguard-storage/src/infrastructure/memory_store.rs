//! In-memory store
//!
//! Locks are bucketed per branch in a `DashMap`; the shard write guard on a
//! branch bucket makes the conflict check and the insert one step.
//! Suitable for tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    BranchLock, BranchStateRecord, LockInsertOutcome, LockStore, ShadowIndexInfo,
    ShadowIndexState, ShadowIndexStore, ShadowInsertOutcome,
};
use crate::error::{Result, StorageError};

#[derive(Clone, Default)]
pub struct InMemoryStore {
    /// branch_name -> every lock ever granted on it
    locks: Arc<DashMap<String, Vec<BranchLock>>>,
    /// lock id -> branch_name
    lock_index: Arc<DashMap<Uuid, String>>,
    branch_states: Arc<DashMap<String, BranchStateRecord>>,
    shadows: Arc<Mutex<HashMap<Uuid, ShadowIndexInfo>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn branch_of(&self, lock_id: Uuid) -> Option<String> {
        self.lock_index.get(&lock_id).map(|b| b.value().clone())
    }

    fn collect_active<F>(&self, mut keep: F) -> Vec<BranchLock>
    where
        F: FnMut(&BranchLock) -> bool,
    {
        let mut out: Vec<BranchLock> = self
            .locks
            .iter()
            .flat_map(|bucket| {
                bucket
                    .value()
                    .iter()
                    .filter(|l| l.is_active && keep(l))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by_key(|l| l.acquired_at);
        out
    }
}

#[async_trait]
impl LockStore for InMemoryStore {
    async fn insert_if_no_conflict(&self, lock: &BranchLock) -> Result<LockInsertOutcome> {
        lock.validate()?;
        if self.lock_index.contains_key(&lock.id) {
            return Err(StorageError::validation(format!(
                "lock id already exists: {}",
                lock.id
            )));
        }

        let mut bucket = self.locks.entry(lock.branch_name.clone()).or_default();
        let conflicts: Vec<BranchLock> = bucket
            .iter()
            .filter(|existing| existing.conflicts_with(lock))
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            return Ok(LockInsertOutcome::Conflict(conflicts));
        }
        bucket.push(lock.clone());
        drop(bucket);

        self.lock_index.insert(lock.id, lock.branch_name.clone());
        Ok(LockInsertOutcome::Inserted)
    }

    async fn get_lock(&self, lock_id: Uuid) -> Result<Option<BranchLock>> {
        let Some(branch) = self.branch_of(lock_id) else {
            return Ok(None);
        };
        Ok(self
            .locks
            .get(&branch)
            .and_then(|bucket| bucket.iter().find(|l| l.id == lock_id).cloned()))
    }

    async fn list_active_locks(&self, branch_name: Option<&str>) -> Result<Vec<BranchLock>> {
        Ok(self.collect_active(|l| branch_name.map_or(true, |b| l.branch_name == b)))
    }

    async fn deactivate_lock(
        &self,
        lock_id: Uuid,
        released_by: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<BranchLock>> {
        let Some(branch) = self.branch_of(lock_id) else {
            return Ok(None);
        };
        let Some(mut bucket) = self.locks.get_mut(&branch) else {
            return Ok(None);
        };
        match bucket.iter_mut().find(|l| l.id == lock_id) {
            Some(lock) if lock.is_active => {
                lock.deactivate(released_by, at);
                Ok(Some(lock.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn record_heartbeat(&self, lock_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let Some(branch) = self.branch_of(lock_id) else {
            return Ok(false);
        };
        let Some(mut bucket) = self.locks.get_mut(&branch) else {
            return Ok(false);
        };
        match bucket.iter_mut().find(|l| l.id == lock_id) {
            Some(lock) if lock.is_active && lock.heartbeat_enabled => {
                lock.last_heartbeat = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend_expiry(
        &self,
        lock_id: Uuid,
        extension: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let Some(branch) = self.branch_of(lock_id) else {
            return Ok(None);
        };
        let Some(mut bucket) = self.locks.get_mut(&branch) else {
            return Ok(None);
        };
        match bucket.iter_mut().find(|l| l.id == lock_id) {
            Some(lock) if lock.is_active => {
                let base = lock.expires_at.map_or(now, |at| at.max(now));
                let deadline = base + extension;
                lock.expires_at = Some(deadline);
                Ok(Some(deadline))
            }
            _ => Ok(None),
        }
    }

    async fn find_expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<BranchLock>> {
        Ok(self.collect_active(|l| l.is_expired(now)))
    }

    async fn find_heartbeat_stale_locks(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<BranchLock>> {
        Ok(self.collect_active(|l| l.is_heartbeat_stale(now, timeout)))
    }

    async fn get_branch_state(&self, branch_name: &str) -> Result<Option<BranchStateRecord>> {
        Ok(self.branch_states.get(branch_name).map(|r| r.value().clone()))
    }

    async fn list_branch_states(&self) -> Result<Vec<BranchStateRecord>> {
        let mut states: Vec<BranchStateRecord> = self
            .branch_states
            .iter()
            .map(|r| r.value().clone())
            .collect();
        states.sort_by(|a, b| a.branch_name.cmp(&b.branch_name));
        Ok(states)
    }

    async fn compare_and_swap_branch_state(
        &self,
        record: &BranchStateRecord,
        expected_version: u64,
    ) -> Result<bool> {
        let mut next = record.clone();
        next.version = expected_version + 1;

        match self.branch_states.entry(record.branch_name.clone()) {
            Entry::Occupied(mut stored) => {
                if stored.get().version != expected_version {
                    return Ok(false);
                }
                stored.insert(next);
                Ok(true)
            }
            Entry::Vacant(slot) => {
                if expected_version != 0 {
                    return Ok(false);
                }
                slot.insert(next);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl ShadowIndexStore for InMemoryStore {
    async fn insert_if_no_active_shadow(
        &self,
        info: &ShadowIndexInfo,
    ) -> Result<ShadowInsertOutcome> {
        let mut shadows = self.shadows.lock();
        if let Some(existing) = shadows.values().find(|s| {
            s.branch_name == info.branch_name
                && s.index_type == info.index_type
                && s.state.is_in_flight()
        }) {
            return Ok(ShadowInsertOutcome::Conflict(Box::new(existing.clone())));
        }
        shadows.insert(info.id, info.clone());
        Ok(ShadowInsertOutcome::Inserted)
    }

    async fn get_shadow(&self, shadow_id: Uuid) -> Result<Option<ShadowIndexInfo>> {
        Ok(self.shadows.lock().get(&shadow_id).cloned())
    }

    async fn list_shadows(&self, branch_name: Option<&str>) -> Result<Vec<ShadowIndexInfo>> {
        let mut out: Vec<ShadowIndexInfo> = self
            .shadows
            .lock()
            .values()
            .filter(|s| branch_name.map_or(true, |b| s.branch_name == b))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.started_at);
        Ok(out)
    }

    async fn compare_and_swap_shadow(
        &self,
        info: &ShadowIndexInfo,
        expected_state: ShadowIndexState,
    ) -> Result<bool> {
        let mut shadows = self.shadows.lock();
        match shadows.get_mut(&info.id) {
            Some(stored) if stored.state == expected_state => {
                *stored = info.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_shadow(&self, shadow_id: Uuid) -> Result<bool> {
        Ok(self.shadows.lock().remove(&shadow_id).is_some())
    }
}

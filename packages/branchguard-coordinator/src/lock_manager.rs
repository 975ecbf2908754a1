use crate::audit::{self, AuditAction, AuditRecord, AuditSink};
use crate::branch_state::BranchStateMachine;
use crate::clock::Clock;
use crate::config::LockConfig;
use crate::error::{CoordinatorError, Result};
use branchguard_storage::{
    BranchLock, BranchStateRecord, BranchStatus, LockInsertOutcome, LockScope, LockStore,
    LockType, StorageError,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TTL_SWEEP_ACTOR: &str = "system:ttl-sweep";
const HEARTBEAT_SWEEP_ACTOR: &str = "system:heartbeat-sweep";

/// Parameters of one lock acquisition
#[derive(Debug, Clone)]
pub struct AcquireLockRequest {
    pub branch_name: String,
    pub lock_type: LockType,
    pub locked_by: String,
    pub lock_scope: LockScope,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub reason: String,
    /// Lease length; the configured default TTL when absent
    pub timeout: Option<Duration>,
    pub enable_heartbeat: bool,
}

impl AcquireLockRequest {
    /// Branch-scoped request with heartbeat enabled and the default TTL.
    pub fn new(
        branch_name: impl Into<String>,
        lock_type: LockType,
        locked_by: impl Into<String>,
    ) -> Self {
        Self {
            branch_name: branch_name.into(),
            lock_type,
            locked_by: locked_by.into(),
            lock_scope: LockScope::Branch,
            resource_type: None,
            resource_id: None,
            reason: String::new(),
            timeout: None,
            enable_heartbeat: true,
        }
    }

    /// Narrow the request to one resource type.
    pub fn resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.lock_scope = LockScope::ResourceType;
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn heartbeat(mut self, enabled: bool) -> Self {
        self.enable_heartbeat = enabled;
        self
    }
}

/// Branch record together with the locks currently held on it
#[derive(Debug, Clone, Serialize)]
pub struct BranchStateInfo {
    pub state: BranchStateRecord,
    pub active_locks: Vec<BranchLock>,
}

impl BranchStateInfo {
    pub fn current_state(&self) -> BranchStatus {
        self.state.current_state
    }

    pub fn indexing_locks(&self) -> impl Iterator<Item = &BranchLock> {
        self.active_locks.iter().filter(|l| l.is_indexing())
    }
}

/// Counts from one pass of both sweeps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: usize,
    pub heartbeat_expired: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.expired + self.heartbeat_expired
    }
}

/// Snapshot for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct LockHealthReport {
    pub active_locks: usize,
    /// Past their TTL but not yet swept
    pub ttl_expired_active: usize,
    /// Heartbeat overdue but not yet swept
    pub heartbeat_stale: usize,
    pub branches_by_state: BTreeMap<String, usize>,
    pub checked_at: DateTime<Utc>,
}

impl LockHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.ttl_expired_active == 0 && self.heartbeat_stale == 0
    }
}

/// Grants, releases and sweeps branch locks, and drives branch state.
///
/// The conflict check and the insert are one store call, so the manager
/// keeps no lock state of its own. Branch-state writes are optimistic:
/// read the versioned record, apply a transition, compare-and-swap, retry.
pub struct LockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn LockStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        config: LockConfig,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Acquire / release
    // ═══════════════════════════════════════════════════════════════════════

    /// Grant a lock or fail fast with `LockConflict`.
    pub async fn acquire_lock(&self, request: AcquireLockRequest) -> Result<BranchLock> {
        let ttl = request.timeout.unwrap_or_else(|| self.config.default_ttl());
        self.check_duration("timeout", ttl)?;

        let now = self.clock.now();
        let mut lock = BranchLock::branch_scoped(
            request.branch_name.trim(),
            request.lock_type,
            request.locked_by,
            request.reason,
            now,
        );
        lock.lock_scope = request.lock_scope;
        lock.resource_type = request.resource_type;
        lock.resource_id = request.resource_id;
        let lock = lock
            .with_expiry(now + ttl)
            .with_heartbeat(request.enable_heartbeat);
        lock.validate()
            .map_err(|e| CoordinatorError::Validation(e.message))?;

        if let LockInsertOutcome::Conflict(holders) = self.store.insert_if_no_conflict(&lock).await? {
            let conflicting: Vec<Uuid> = holders.iter().map(|l| l.id).collect();
            debug!(
                "Lock conflict on branch {} ({} {:?}): held by {:?}",
                lock.branch_name, lock.lock_type, lock.resource_type, conflicting
            );
            return Err(CoordinatorError::LockConflict {
                branch: lock.branch_name,
                conflicting,
            });
        }

        // Always write the branch record after the insert so a concurrent
        // release working from an older version has to re-count.
        let is_indexing = lock.is_indexing();
        let holder = lock.locked_by.clone();
        let state_update = self
            .update_branch_state(&lock.branch_name, |sm, _| {
                if is_indexing {
                    sm.begin_indexing(&holder, now)?;
                }
                Ok(true)
            })
            .await;

        if let Err(e) = state_update {
            warn!(
                "Rolling back lock {} on {}: branch state update failed: {}",
                lock.id, lock.branch_name, e
            );
            self.store
                .deactivate_lock(lock.id, "system:rollback", self.clock.now())
                .await?;
            return Err(e);
        }

        info!(
            "Lock {} acquired on {} by {} ({}, {}{})",
            lock.id,
            lock.branch_name,
            lock.locked_by,
            lock.lock_type,
            lock.lock_scope,
            lock.resource_type
                .as_deref()
                .map(|rt| format!(":{}", rt))
                .unwrap_or_default()
        );
        self.audit(
            AuditRecord::new(AuditAction::LockAcquired, &lock.locked_by, &lock.branch_name, now)
                .with_metadata(serde_json::json!({
                    "lock_id": lock.id,
                    "lock_type": lock.lock_type,
                    "lock_scope": lock.lock_scope,
                    "resource_type": lock.resource_type,
                    "resource_id": lock.resource_id,
                    "expires_at": lock.expires_at,
                    "reason": lock.reason,
                })),
        )
        .await;

        Ok(lock)
    }

    /// Release a lock. `false` when it was already inactive or never existed.
    pub async fn release_lock(&self, lock_id: Uuid, released_by: &str) -> Result<bool> {
        let now = self.clock.now();
        let Some(lock) = self.store.deactivate_lock(lock_id, released_by, now).await? else {
            debug!("Release of {} by {}: not active", lock_id, released_by);
            return Ok(false);
        };

        info!("Lock {} on {} released by {}", lock.id, lock.branch_name, released_by);
        self.after_deactivation(&[lock], released_by, AuditAction::LockReleased)
            .await?;
        Ok(true)
    }

    /// Deactivate every active lock on the branch regardless of owner.
    pub async fn force_unlock(
        &self,
        branch_name: &str,
        admin_user: &str,
        reason: &str,
    ) -> Result<usize> {
        let now = self.clock.now();
        let active = self.store.list_active_locks(Some(branch_name)).await?;

        let mut released = Vec::with_capacity(active.len());
        for lock in active {
            if let Some(lock) = self.store.deactivate_lock(lock.id, admin_user, now).await? {
                released.push(lock);
            }
        }

        warn!(
            "Force unlock on {} by {}: {} lock(s) released ({})",
            branch_name,
            admin_user,
            released.len(),
            reason
        );
        let count = released.len();
        if count > 0 {
            self.settle_if_indexing(branch_name, &released).await?;
        }
        self.audit(
            AuditRecord::new(AuditAction::LockForceUnlocked, admin_user, branch_name, now)
                .with_metadata(serde_json::json!({
                    "released": count,
                    "lock_ids": released.iter().map(|l| l.id).collect::<Vec<_>>(),
                    "reason": reason,
                })),
        )
        .await;

        Ok(count)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Indexing lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Take the INDEXING locks for a job: one BRANCH lock, or one
    /// RESOURCE_TYPE lock per type. All or nothing.
    pub async fn lock_for_indexing(
        &self,
        branch_name: &str,
        service: &str,
        resource_types: Option<&[String]>,
        timeout: Option<Duration>,
        reason: &str,
    ) -> Result<Vec<BranchLock>> {
        let requests: Vec<AcquireLockRequest> = match resource_types {
            Some(types) if !types.is_empty() => types
                .iter()
                .map(|rt| {
                    AcquireLockRequest::new(branch_name, LockType::Indexing, service)
                        .resource_type(rt.clone())
                        .reason(reason)
                })
                .collect(),
            _ => vec![AcquireLockRequest::new(branch_name, LockType::Indexing, service).reason(reason)],
        };

        let mut granted = Vec::with_capacity(requests.len());
        for mut request in requests {
            request.timeout = timeout;
            match self.acquire_lock(request).await {
                Ok(lock) => granted.push(lock),
                Err(e) => {
                    for lock in &granted {
                        self.release_lock(lock.id, service).await?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(granted)
    }

    /// Release the INDEXING locks matching `resource_types` (all of them
    /// when `None`). `false` when nothing matched.
    pub async fn complete_indexing(
        &self,
        branch_name: &str,
        completed_by: &str,
        resource_types: Option<&[String]>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let wanted: Option<HashSet<&str>> =
            resource_types.map(|types| types.iter().map(String::as_str).collect());

        let targets: Vec<BranchLock> = self
            .store
            .list_active_locks(Some(branch_name))
            .await?
            .into_iter()
            .filter(|l| l.is_indexing())
            .filter(|l| match &wanted {
                None => true,
                Some(types) => l
                    .resource_type
                    .as_deref()
                    .map_or(false, |rt| types.contains(rt)),
            })
            .collect();

        if targets.is_empty() {
            info!(
                "complete_indexing on {} by {}: no matching INDEXING lock (resource types {:?})",
                branch_name, completed_by, resource_types
            );
            return Ok(false);
        }

        let mut released = Vec::with_capacity(targets.len());
        for lock in targets {
            if let Some(lock) = self.store.deactivate_lock(lock.id, completed_by, now).await? {
                released.push(lock);
            }
        }
        if released.is_empty() {
            return Ok(false);
        }

        let state = self.settle_indexing_state(branch_name).await?;
        info!(
            "Indexing completed on {} by {}: {} lock(s) released, branch now {}",
            branch_name,
            completed_by,
            released.len(),
            state.current_state
        );
        self.audit(
            AuditRecord::new(AuditAction::IndexingCompleted, completed_by, branch_name, now)
                .with_metadata(serde_json::json!({
                    "lock_ids": released.iter().map(|l| l.id).collect::<Vec<_>>(),
                    "resource_types": resource_types,
                    "branch_state": state.current_state,
                })),
        )
        .await;

        Ok(true)
    }

    /// Record an indexing failure: branch → ERROR and its INDEXING locks are
    /// released. The branch stays in ERROR until recovered or re-indexed.
    pub async fn fail_indexing(
        &self,
        branch_name: &str,
        reported_by: &str,
        error_message: &str,
    ) -> Result<BranchStateRecord> {
        let now = self.clock.now();
        let record = self
            .update_branch_state(branch_name, |sm, _| {
                sm.fail(error_message, now)?;
                Ok(true)
            })
            .await?;

        let mut released = Vec::new();
        for lock in self.store.list_active_locks(Some(branch_name)).await? {
            if !lock.is_indexing() {
                continue;
            }
            if let Some(lock) = self.store.deactivate_lock(lock.id, reported_by, now).await? {
                released.push(lock.id);
            }
        }

        warn!(
            "Indexing failed on {} (reported by {}): {}; {} lock(s) released",
            branch_name,
            reported_by,
            error_message,
            released.len()
        );
        self.audit(
            AuditRecord::new(AuditAction::IndexingFailed, reported_by, branch_name, now)
                .with_metadata(serde_json::json!({
                    "error_message": error_message,
                    "lock_ids": released,
                }))
                .failed(),
        )
        .await;

        Ok(record)
    }

    /// Transition: READY → ACTIVE
    pub async fn mark_merged(&self, branch_name: &str, merged_by: &str) -> Result<BranchStateRecord> {
        let now = self.clock.now();
        let record = self
            .update_branch_state(branch_name, |sm, _| {
                sm.merge(merged_by, now)?;
                Ok(true)
            })
            .await?;

        info!("Branch {} merged by {}", branch_name, merged_by);
        self.audit(AuditRecord::new(
            AuditAction::BranchMerged,
            merged_by,
            branch_name,
            now,
        ))
        .await;
        Ok(record)
    }

    /// Put the branch in ERROR without touching its locks. Used when a step
    /// after indexing fails; any lock taken since belongs to another job.
    pub async fn mark_error(
        &self,
        branch_name: &str,
        reported_by: &str,
        error_message: &str,
    ) -> Result<BranchStateRecord> {
        let now = self.clock.now();
        let record = self
            .update_branch_state(branch_name, |sm, _| {
                sm.fail(error_message, now)?;
                Ok(true)
            })
            .await?;

        warn!(
            "Branch {} marked ERROR by {}: {}",
            branch_name, reported_by, error_message
        );
        self.audit(
            AuditRecord::new(AuditAction::BranchErrored, reported_by, branch_name, now)
                .with_metadata(serde_json::json!({ "error_message": error_message }))
                .failed(),
        )
        .await;
        Ok(record)
    }

    /// Transition: ERROR → ACTIVE, or LOCKED_FOR_WRITE if INDEXING locks remain
    pub async fn recover_branch(
        &self,
        branch_name: &str,
        operator: &str,
        reason: &str,
    ) -> Result<BranchStateRecord> {
        let now = self.clock.now();
        let record = self
            .update_branch_state(branch_name, |sm, active| {
                let indexing_remains = active.iter().any(|l| l.is_indexing());
                sm.recover(indexing_remains, now)?;
                Ok(true)
            })
            .await?;

        info!(
            "Branch {} recovered by {} to {} ({})",
            branch_name, operator, record.current_state, reason
        );
        self.audit(
            AuditRecord::new(AuditAction::BranchRecovered, operator, branch_name, now)
                .with_metadata(serde_json::json!({
                    "reason": reason,
                    "branch_state": record.current_state,
                })),
        )
        .await;
        Ok(record)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Liveness
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a heartbeat. Never extends the TTL.
    pub async fn send_heartbeat(
        &self,
        lock_id: Uuid,
        service_name: &str,
        status: &str,
        progress_info: Option<&serde_json::Value>,
    ) -> Result<bool> {
        let recorded = self.store.record_heartbeat(lock_id, self.clock.now()).await?;
        if recorded {
            debug!(
                "Heartbeat for {} from {} ({}) progress={}",
                lock_id,
                service_name,
                status,
                progress_info.cloned().unwrap_or(serde_json::Value::Null)
            );
        } else {
            debug!(
                "Heartbeat for {} from {} ignored: lock inactive, unknown or heartbeat disabled",
                lock_id, service_name
            );
        }
        Ok(recorded)
    }

    /// Push the TTL deadline forward. `false` when the lock is not active.
    pub async fn extend_lock_ttl(
        &self,
        lock_id: Uuid,
        extension: Duration,
        extended_by: &str,
        reason: &str,
    ) -> Result<bool> {
        self.check_duration("extension", extension)?;

        let now = self.clock.now();
        let Some(deadline) = self.store.extend_expiry(lock_id, extension, now).await? else {
            return Ok(false);
        };

        let branch = self
            .store
            .get_lock(lock_id)
            .await?
            .map(|l| l.branch_name)
            .unwrap_or_default();
        info!(
            "Lock {} TTL extended by {}s to {} by {} ({})",
            lock_id,
            extension.num_seconds(),
            deadline,
            extended_by,
            reason
        );
        self.audit(
            AuditRecord::new(AuditAction::LockTtlExtended, extended_by, branch, now)
                .with_metadata(serde_json::json!({
                    "lock_id": lock_id,
                    "expires_at": deadline,
                    "reason": reason,
                })),
        )
        .await;
        Ok(true)
    }

    /// Deactivate locks past their TTL deadline.
    pub async fn cleanup_expired_locks(&self) -> Result<usize> {
        let now = self.clock.now();
        let expired = self.store.find_expired_locks(now).await?;
        self.reap(expired, TTL_SWEEP_ACTOR, now, "ttl").await
    }

    /// Deactivate heartbeat-enabled locks whose holder went silent.
    pub async fn cleanup_heartbeat_expired_locks(&self) -> Result<usize> {
        let now = self.clock.now();
        let stale = self
            .store
            .find_heartbeat_stale_locks(now, self.config.heartbeat_timeout())
            .await?;
        self.reap(stale, HEARTBEAT_SWEEP_ACTOR, now, "heartbeat").await
    }

    /// TTL sweep, then heartbeat sweep.
    pub async fn run_sweeps(&self) -> Result<SweepReport> {
        let expired = self.cleanup_expired_locks().await?;
        let heartbeat_expired = self.cleanup_heartbeat_expired_locks().await?;
        Ok(SweepReport {
            expired,
            heartbeat_expired,
        })
    }

    async fn reap(
        &self,
        candidates: Vec<BranchLock>,
        actor: &str,
        now: DateTime<Utc>,
        cause: &str,
    ) -> Result<usize> {
        let mut reaped = 0;
        for lock in candidates {
            let released = match self.store.deactivate_lock(lock.id, actor, now).await {
                Ok(Some(released)) => released,
                Ok(None) => continue,
                Err(e) => {
                    warn!("{} sweep: failed to deactivate {}: {}", cause, lock.id, e);
                    continue;
                }
            };
            reaped += 1;
            info!(
                "{} sweep reaped lock {} on {} held by {}",
                cause, released.id, released.branch_name, released.locked_by
            );
            if let Err(e) = self
                .after_deactivation(&[released], actor, AuditAction::LockExpired)
                .await
            {
                warn!("{} sweep: branch state update failed: {}", cause, e);
            }
        }
        Ok(reaped)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Branch record (implicit ACTIVE if never written) and its active locks.
    pub async fn get_branch_state(&self, branch_name: &str) -> Result<BranchStateInfo> {
        let state = self
            .store
            .get_branch_state(branch_name)
            .await?
            .unwrap_or_else(|| BranchStateRecord::new(branch_name, self.clock.now()));
        let active_locks = self.store.list_active_locks(Some(branch_name)).await?;
        Ok(BranchStateInfo {
            state,
            active_locks,
        })
    }

    pub async fn list_active_locks(&self, branch_name: Option<&str>) -> Result<Vec<BranchLock>> {
        Ok(self.store.list_active_locks(branch_name).await?)
    }

    pub async fn get_lock_status(&self, lock_id: Uuid) -> Result<Option<BranchLock>> {
        Ok(self.store.get_lock(lock_id).await?)
    }

    pub async fn list_branch_states(&self) -> Result<Vec<BranchStateRecord>> {
        Ok(self.store.list_branch_states().await?)
    }

    pub async fn health_report(&self) -> Result<LockHealthReport> {
        let now = self.clock.now();
        let active = self.store.list_active_locks(None).await?;
        let timeout = self.config.heartbeat_timeout();

        let mut branches_by_state = BTreeMap::new();
        for status in BranchStatus::all() {
            branches_by_state.insert(status.to_string(), 0);
        }
        for record in self.store.list_branch_states().await? {
            *branches_by_state
                .entry(record.current_state.to_string())
                .or_insert(0) += 1;
        }

        Ok(LockHealthReport {
            active_locks: active.len(),
            ttl_expired_active: active.iter().filter(|l| l.is_expired(now)).count(),
            heartbeat_stale: active
                .iter()
                .filter(|l| l.is_heartbeat_stale(now, timeout))
                .count(),
            branches_by_state,
            checked_at: now,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    fn check_duration(&self, field: &str, value: Duration) -> Result<()> {
        if value <= Duration::zero() {
            return Err(CoordinatorError::Validation(format!(
                "{} must be positive",
                field
            )));
        }
        if value > self.config.max_ttl() {
            return Err(CoordinatorError::Validation(format!(
                "{} of {}s exceeds the maximum of {}s",
                field,
                value.num_seconds(),
                self.config.max_ttl_seconds
            )));
        }
        Ok(())
    }

    async fn audit(&self, record: AuditRecord) {
        audit::emit(self.audit.as_ref(), record).await;
    }

    async fn after_deactivation(
        &self,
        released: &[BranchLock],
        actor: &str,
        action: AuditAction,
    ) -> Result<()> {
        let Some(first) = released.first() else {
            return Ok(());
        };
        self.settle_if_indexing(&first.branch_name, released).await?;

        let now = self.clock.now();
        for lock in released {
            self.audit(
                AuditRecord::new(action, actor, &lock.branch_name, now).with_metadata(
                    serde_json::json!({
                        "lock_id": lock.id,
                        "lock_type": lock.lock_type,
                        "locked_by": lock.locked_by,
                    }),
                ),
            )
            .await;
        }
        Ok(())
    }

    async fn settle_if_indexing(&self, branch_name: &str, released: &[BranchLock]) -> Result<()> {
        if released.iter().any(|l| l.is_indexing()) {
            self.settle_indexing_state(branch_name).await?;
        }
        Ok(())
    }

    /// LOCKED_FOR_WRITE → READY once no INDEXING lock is left.
    async fn settle_indexing_state(&self, branch_name: &str) -> Result<BranchStateRecord> {
        let now = self.clock.now();
        self.update_branch_state(branch_name, |sm, active| {
            let indexing_remains = active.iter().any(|l| l.is_indexing());
            if indexing_remains || sm.state() != BranchStatus::LockedForWrite {
                return Ok(false);
            }
            sm.finish_indexing(now)?;
            Ok(true)
        })
        .await
    }

    /// Optimistic read-modify-write of one branch record.
    ///
    /// `apply` sees the current record and the branch's active locks and
    /// returns whether the record should be written. Lost races re-read and
    /// re-apply, up to `max_state_retries` times.
    async fn update_branch_state<F>(&self, branch_name: &str, mut apply: F) -> Result<BranchStateRecord>
    where
        F: FnMut(&mut BranchStateMachine, &[BranchLock]) -> Result<bool>,
    {
        for attempt in 1..=self.config.max_state_retries {
            let current = self
                .store
                .get_branch_state(branch_name)
                .await?
                .unwrap_or_else(|| BranchStateRecord::new(branch_name, self.clock.now()));
            let expected_version = current.version;
            let active = self.store.list_active_locks(Some(branch_name)).await?;

            let mut sm = BranchStateMachine::new(current);
            if !apply(&mut sm, &active)? {
                return Ok(sm.into_record());
            }

            let mut next = sm.into_record();
            if self
                .store
                .compare_and_swap_branch_state(&next, expected_version)
                .await?
            {
                next.version = expected_version + 1;
                return Ok(next);
            }
            debug!(
                "Branch state for {} changed concurrently (attempt {})",
                branch_name, attempt
            );
        }

        Err(StorageError::transaction(format!(
            "branch state for '{}' kept changing after {} attempts",
            branch_name, self.config.max_state_retries
        ))
        .into())
    }
}

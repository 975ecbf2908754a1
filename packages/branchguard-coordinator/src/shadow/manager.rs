use crate::audit::{self, AuditAction, AuditRecord, AuditSink};
use crate::clock::Clock;
use crate::config::ShadowConfig;
use crate::error::{CoordinatorError, Result};
use crate::lock_manager::{AcquireLockRequest, LockManager};
use branchguard_storage::{
    BranchLock, IndexType, LockType, ShadowIndexInfo, ShadowIndexState, ShadowIndexStore,
    ShadowInsertOutcome,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::swap::{DirStats, IndexSwapper, SwapOutcome, SwapPlan};
use super::validation::{validate_shadow, ValidationCheck, ValidationPolicy};

/// Hex digits of the branch-name hash kept in directory names
const PATH_HASH_LEN: usize = 12;

/// Parameters of one switch attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchRequest {
    /// Switch even when validation fails
    pub force_switch: bool,
    pub validation_checks: Vec<ValidationCheck>,
    /// Keep the replaced index next to the new one
    pub backup_current: bool,
    /// Lease for the switch lock and budget for the swap
    pub switch_timeout_seconds: Option<u64>,
}

impl Default for SwitchRequest {
    fn default() -> Self {
        Self {
            force_switch: false,
            validation_checks: vec![
                ValidationCheck::RecordCountValidation,
                ValidationCheck::SizeComparison,
            ],
            backup_current: true,
            switch_timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchResult {
    pub success: bool,
    pub switch_duration_ms: u64,
    pub validation_passed: bool,
    pub verification_passed: bool,
    pub old_index_path: PathBuf,
    pub new_index_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub validation_errors: Vec<String>,
    pub verification_errors: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Lock held for the critical section, if one was taken
    pub lock_id: Option<Uuid>,
    pub size_delta_bytes: Option<i64>,
    pub rolled_back: bool,
}

/// Entry in the in-memory switch history
#[derive(Debug, Clone, Serialize)]
pub struct SwitchRecord {
    pub shadow_index_id: Uuid,
    pub branch_name: String,
    pub index_type: IndexType,
    pub requested_by: String,
    pub finished_at: DateTime<Utc>,
    pub result: SwitchResult,
}

/// What one monitor pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorReport {
    pub removed: usize,
    pub cancelled_stale: usize,
}

/// Shadow index builds and the atomic switch to the served index.
///
/// Builds take no lock; the branch stays writable while the builder fills
/// `shadow_<id>`. Only the switch takes a short INDEXING lock scoped to
/// `index_<type>`, and that lock never outlives `request_atomic_switch`.
pub struct ShadowIndexManager {
    store: Arc<dyn ShadowIndexStore>,
    locks: Arc<LockManager>,
    swapper: Arc<dyn IndexSwapper>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    config: ShadowConfig,
    history: Mutex<VecDeque<SwitchRecord>>,
}

impl ShadowIndexManager {
    pub fn new(
        store: Arc<dyn ShadowIndexStore>,
        locks: Arc<LockManager>,
        swapper: Arc<dyn IndexSwapper>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        config: ShadowConfig,
    ) -> Self {
        Self {
            store,
            locks,
            swapper,
            clock,
            audit,
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// `<base>/<branch>-<hash>/<index_type>`
    pub fn index_root(&self, branch_name: &str, index_type: IndexType) -> PathBuf {
        self.config
            .base_path
            .join(path_segment(branch_name))
            .join(index_type.slug())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Build lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Register a new build and hand back its id. Fails with
    /// `ShadowIndexConflict` while another build for the same branch and
    /// index type is in flight.
    pub async fn start_shadow_build(
        &self,
        branch_name: &str,
        index_type: IndexType,
        resource_types: &[String],
        service_name: &str,
        build_config: Option<serde_json::Value>,
    ) -> Result<Uuid> {
        if branch_name.trim().is_empty() {
            return Err(CoordinatorError::Validation(
                "branch_name must not be empty".to_string(),
            ));
        }
        if service_name.trim().is_empty() {
            return Err(CoordinatorError::Validation(
                "service_name must not be empty".to_string(),
            ));
        }

        let now = self.clock.now();
        let id = Uuid::new_v4();
        let root = self.index_root(branch_name, index_type);
        let mut info = ShadowIndexInfo::new(
            id,
            branch_name,
            index_type,
            resource_types.iter().cloned(),
            service_name,
            root.join(format!("shadow_{}", id.simple())),
            root.join("current"),
            self.config.switch_strategy,
            now,
        );
        info.build_config = build_config.unwrap_or(serde_json::Value::Null);

        if let ShadowInsertOutcome::Conflict(existing) =
            self.store.insert_if_no_active_shadow(&info).await?
        {
            info!(
                "Shadow build for {} {} rejected: {} is {}",
                branch_name, index_type, existing.id, existing.state
            );
            return Err(CoordinatorError::ShadowIndexConflict {
                branch: branch_name.to_string(),
                index_type: index_type.to_string(),
                existing: existing.id,
            });
        }

        let shadow_path = info.shadow_index_path.clone();
        if let Err(e) = self.blocking(move |s| s.prepare(&shadow_path)).await {
            self.mark_failed(&mut info, &format!("could not create shadow directory: {}", e))
                .await?;
            return Err(e);
        }

        info.transition_to(ShadowIndexState::Building, self.clock.now())?;
        if !self
            .store
            .compare_and_swap_shadow(&info, ShadowIndexState::Preparing)
            .await?
        {
            return Err(CoordinatorError::InvalidState(format!(
                "shadow index {} changed while starting",
                id
            )));
        }

        info!(
            "Shadow build {} started on {} ({}) by {} at {}",
            id,
            branch_name,
            index_type,
            service_name,
            info.shadow_index_path.display()
        );
        self.audit(
            AuditRecord::new(AuditAction::ShadowBuildStarted, service_name, branch_name, now)
                .with_metadata(serde_json::json!({
                    "shadow_index_id": id,
                    "index_type": index_type,
                    "resource_types": info.resource_types,
                    "shadow_index_path": info.shadow_index_path,
                })),
        )
        .await;

        Ok(id)
    }

    /// Progress callback. `false` unless the build is BUILDING.
    pub async fn update_build_progress(
        &self,
        shadow_index_id: Uuid,
        progress_percent: f64,
        record_count: Option<u64>,
        service_name: &str,
    ) -> Result<bool> {
        if !progress_percent.is_finite() {
            return Err(CoordinatorError::Validation(format!(
                "progress_percent must be finite, got {}",
                progress_percent
            )));
        }
        let Some(mut info) = self.building(shadow_index_id, "progress", service_name).await? else {
            return Ok(false);
        };

        info.build_progress_percent = progress_percent.clamp(0.0, 100.0);
        if record_count.is_some() {
            info.record_count = record_count;
        }
        info.updated_at = self.clock.now();

        let written = self
            .store
            .compare_and_swap_shadow(&info, ShadowIndexState::Building)
            .await?;
        if written {
            debug!(
                "Shadow {} progress {:.1}% ({:?} records)",
                shadow_index_id, info.build_progress_percent, info.record_count
            );
        }
        Ok(written)
    }

    /// BUILDING → BUILT. `false` when called out of order.
    pub async fn complete_shadow_build(
        &self,
        shadow_index_id: Uuid,
        index_size_bytes: u64,
        record_count: u64,
        service_name: &str,
    ) -> Result<bool> {
        let Some(mut info) = self.building(shadow_index_id, "completion", service_name).await? else {
            return Ok(false);
        };

        let now = self.clock.now();
        info.transition_to(ShadowIndexState::Built, now)?;
        info.build_progress_percent = 100.0;
        info.index_size_bytes = Some(index_size_bytes);
        info.record_count = Some(record_count);
        info.completed_at = Some(now);

        let written = self
            .store
            .compare_and_swap_shadow(&info, ShadowIndexState::Building)
            .await?;
        if written {
            info!(
                "Shadow build {} on {} ({}) complete: {} records, {} bytes",
                shadow_index_id, info.branch_name, info.index_type, record_count, index_size_bytes
            );
        }
        Ok(written)
    }

    /// Builder-reported failure. `false` when the build already finished.
    pub async fn fail_shadow_build(
        &self,
        shadow_index_id: Uuid,
        error_message: &str,
        service_name: &str,
    ) -> Result<bool> {
        let Some(mut info) = self.store.get_shadow(shadow_index_id).await? else {
            return Ok(false);
        };
        if info.state.is_terminal() || info.state == ShadowIndexState::Switching {
            debug!(
                "Ignoring failure report for shadow {} in state {}",
                shadow_index_id, info.state
            );
            return Ok(false);
        }

        let written = self.mark_failed(&mut info, error_message).await?;
        if written {
            self.remove_dir_logged(info.shadow_index_path.clone()).await;
            warn!(
                "Shadow build {} on {} failed (reported by {}): {}",
                shadow_index_id, info.branch_name, service_name, error_message
            );
            self.audit(
                AuditRecord::new(
                    AuditAction::ShadowBuildFailed,
                    service_name,
                    &info.branch_name,
                    self.clock.now(),
                )
                .with_metadata(serde_json::json!({
                    "shadow_index_id": shadow_index_id,
                    "error_message": error_message,
                }))
                .failed(),
            )
            .await;
        }
        Ok(written)
    }

    /// Cancel a build that has not started switching. Deletes its directory.
    pub async fn cancel_shadow_build(
        &self,
        shadow_index_id: Uuid,
        cancelled_by: &str,
        reason: &str,
    ) -> Result<bool> {
        let Some(mut info) = self.store.get_shadow(shadow_index_id).await? else {
            return Ok(false);
        };
        let expected = info.state;
        if expected.is_terminal() || expected == ShadowIndexState::Switching {
            return Ok(false);
        }

        info.transition_to(ShadowIndexState::Cancelled, self.clock.now())?;
        info.error_message = Some(format!("cancelled by {}: {}", cancelled_by, reason));
        if !self.store.compare_and_swap_shadow(&info, expected).await? {
            return Ok(false);
        }

        self.remove_dir_logged(info.shadow_index_path.clone()).await;
        info!(
            "Shadow build {} on {} cancelled by {} ({})",
            shadow_index_id, info.branch_name, cancelled_by, reason
        );
        self.audit(
            AuditRecord::new(
                AuditAction::ShadowBuildCancelled,
                cancelled_by,
                &info.branch_name,
                self.clock.now(),
            )
            .with_metadata(serde_json::json!({
                "shadow_index_id": shadow_index_id,
                "previous_state": expected,
                "reason": reason,
            })),
        )
        .await;
        Ok(true)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Switch
    // ═══════════════════════════════════════════════════════════════════════

    /// Make a BUILT shadow the served index.
    ///
    /// Validation runs without a lock. The swap, verification and any
    /// rollback run under an INDEXING lock on `index_<type>` whose lease is
    /// the switch timeout; the lock is released before this returns, on
    /// every path. Filesystem and verification failures come back as
    /// `SwitchResult { success: false, .. }` with the shadow marked FAILED.
    pub async fn request_atomic_switch(
        &self,
        shadow_index_id: Uuid,
        request: SwitchRequest,
        service_name: &str,
    ) -> Result<SwitchResult> {
        let started = Instant::now();
        let mut info = self
            .store
            .get_shadow(shadow_index_id)
            .await?
            .ok_or(CoordinatorError::ShadowIndexNotFound(shadow_index_id))?;
        if info.state != ShadowIndexState::Built {
            return Err(CoordinatorError::InvalidState(format!(
                "shadow index {} is {}, switch requires BUILT",
                shadow_index_id, info.state
            )));
        }
        let timeout_seconds = request
            .switch_timeout_seconds
            .unwrap_or(self.config.default_switch_timeout_seconds);
        if timeout_seconds == 0 {
            return Err(CoordinatorError::Validation(
                "switch_timeout_seconds must be positive".to_string(),
            ));
        }

        let mut result = SwitchResult {
            old_index_path: info.current_index_path.clone(),
            new_index_path: info.shadow_index_path.clone(),
            ..SwitchResult::default()
        };

        let shadow_path = info.shadow_index_path.clone();
        let current_path = info.current_index_path.clone();
        let (shadow_stats, current_stats) = self
            .blocking(move |s| Ok((s.stat(&shadow_path)?, s.stat(&current_path)?)))
            .await?;

        let report = validate_shadow(
            &info,
            &request.validation_checks,
            &shadow_stats,
            &current_stats,
            ValidationPolicy {
                size_tolerance: self.config.size_tolerance,
                min_shadow_size_bytes: self.config.min_shadow_size_bytes,
            },
        );
        result.validation_passed = report.passed();
        result.validation_errors = report.errors;
        result.warnings = report.warnings;

        if !result.validation_passed {
            if !request.force_switch {
                info!(
                    "Switch of shadow {} rejected by validation: {:?}",
                    shadow_index_id, result.validation_errors
                );
                result.errors.push("pre-switch validation failed".to_string());
                return Ok(self.finish_switch(&info, result, started, service_name).await);
            }
            warn!(
                "Forcing switch of shadow {} past {} validation error(s)",
                shadow_index_id,
                result.validation_errors.len()
            );
            result.warnings.push(format!(
                "forced past {} validation error(s)",
                result.validation_errors.len()
            ));
        }

        let lock_request = AcquireLockRequest::new(&info.branch_name, LockType::Indexing, service_name)
            .resource_type(format!("index_{}", info.index_type.slug()))
            .heartbeat(false)
            .timeout(chrono::Duration::seconds(timeout_seconds as i64))
            .reason(format!("atomic switch of shadow index {}", shadow_index_id));
        let lock = match self.locks.acquire_lock(lock_request).await {
            Ok(lock) => lock,
            Err(e @ CoordinatorError::LockConflict { .. }) => {
                info!("Switch of shadow {} deferred: {}", shadow_index_id, e);
                result.errors.push(e.to_string());
                return Ok(self.finish_switch(&info, result, started, service_name).await);
            }
            Err(e) => return Err(e),
        };
        result.lock_id = Some(lock.id);

        let critical = self
            .switch_under_lock(&mut info, &request, timeout_seconds, &current_stats, &lock, &mut result)
            .await;

        match self.locks.release_lock(lock.id, service_name).await {
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to release switch lock {}: {}", lock.id, e);
                result
                    .warnings
                    .push(format!("switch lock {} left to its TTL: {}", lock.id, e));
            }
        }

        if let Err(e) = critical {
            warn!("Switch of shadow {} failed: {}", shadow_index_id, e);
            result.errors.push(e.to_string());
        }

        if info.state == ShadowIndexState::Switching {
            let succeeded = result.errors.is_empty() && result.verification_passed;
            if let Err(e) = self.settle_switch(&mut info, succeeded, &result).await {
                warn!("Could not record outcome of switch {}: {}", shadow_index_id, e);
                result.errors.push(e.to_string());
            }
        }

        Ok(self.finish_switch(&info, result, started, service_name).await)
    }

    async fn switch_under_lock(
        &self,
        info: &mut ShadowIndexInfo,
        request: &SwitchRequest,
        timeout_seconds: u64,
        before: &DirStats,
        lock: &BranchLock,
        result: &mut SwitchResult,
    ) -> Result<()> {
        info.transition_to(ShadowIndexState::Switching, self.clock.now())?;
        if !self
            .store
            .compare_and_swap_shadow(info, ShadowIndexState::Built)
            .await?
        {
            info.state = ShadowIndexState::Built;
            return Err(CoordinatorError::InvalidState(format!(
                "shadow index {} changed before the switch started",
                info.id
            )));
        }

        let plan = self.swap_plan(info, request.backup_current);
        let swapper = Arc::clone(&self.swapper);
        let mut swap = tokio::task::spawn_blocking(move || swapper.swap(&plan));
        let budget = std::time::Duration::from_secs(timeout_seconds);

        // A blocking rename cannot be cancelled. Past the budget the switch
        // is failed, but the lock stays held until the rename returns.
        let (joined, overran) = match tokio::time::timeout(budget, &mut swap).await {
            Ok(joined) => (joined, false),
            Err(_) => {
                let overrun = CoordinatorError::Timeout(format!(
                    "swap of shadow index {} exceeded {}s",
                    info.id, timeout_seconds
                ));
                warn!("{}; holding switch lock {} until it returns", overrun, lock.id);
                result.errors.push(overrun.to_string());
                (self.outlast_swap(&mut swap, lock, timeout_seconds).await, true)
            }
        };
        let outcome = joined.map_err(|e| anyhow::anyhow!("filesystem task failed: {}", e))??;

        result.backup_path = outcome.backup_path.clone();
        info.backup_path = outcome.backup_path;

        if overran {
            warn!(
                "Swap of shadow {} finished after the switch was failed; restoring previous index",
                info.id
            );
            self.roll_back(info, result).await;
            return Ok(());
        }

        let current = info.current_index_path.clone();
        match self.blocking(move |s| s.verify(&current)).await {
            Ok(after) => {
                result.verification_passed = true;
                result.size_delta_bytes = Some(after.size_bytes as i64 - before.size_bytes as i64);
                if after.entry_count == 0 {
                    result
                        .warnings
                        .push("served index directory is empty".to_string());
                }
            }
            Err(e) => {
                result
                    .verification_errors
                    .push(format!("served index not readable after switch: {}", e));
                if self.config.rollback_on_verification_failure {
                    self.roll_back(info, result).await;
                }
            }
        }
        Ok(())
    }

    /// Renew the switch lock's lease until an overrunning swap returns.
    async fn outlast_swap(
        &self,
        swap: &mut JoinHandle<std::io::Result<SwapOutcome>>,
        lock: &BranchLock,
        timeout_seconds: u64,
    ) -> std::result::Result<std::io::Result<SwapOutcome>, JoinError> {
        let lease = chrono::Duration::seconds(timeout_seconds as i64);
        let budget = std::time::Duration::from_secs(timeout_seconds);
        loop {
            if let Err(e) = self
                .locks
                .extend_lock_ttl(lock.id, lease, &lock.locked_by, "swap still running")
                .await
            {
                warn!("Could not extend switch lock {}: {}", lock.id, e);
            }
            if let Ok(joined) = tokio::time::timeout(budget, &mut *swap).await {
                return joined;
            }
        }
    }

    /// Put the backup back in place of the served index.
    async fn roll_back(&self, info: &ShadowIndexInfo, result: &mut SwitchResult) {
        let Some(backup) = info.backup_path.clone() else {
            result
                .warnings
                .push("no backup to roll back to".to_string());
            return;
        };

        let current = info.current_index_path.clone();
        let quarantine = self
            .index_root(&info.branch_name, info.index_type)
            .join(format!("failed_{}", info.id.simple()));
        match self
            .blocking(move |s| s.restore(&current, &backup, &quarantine))
            .await
        {
            Ok(()) => {
                warn!("Rolled back switch of shadow {} to its backup", info.id);
                result.rolled_back = true;
                result.backup_path = None;
            }
            Err(e) => {
                result.errors.push(format!("rollback failed: {}", e));
            }
        }
    }

    async fn settle_switch(
        &self,
        info: &mut ShadowIndexInfo,
        succeeded: bool,
        result: &SwitchResult,
    ) -> Result<()> {
        let now = self.clock.now();
        if succeeded {
            info.transition_to(ShadowIndexState::Active, now)?;
            info.switched_at = Some(now);
        } else {
            info.transition_to(ShadowIndexState::Failed, now)?;
            let reason = result
                .errors
                .iter()
                .chain(result.verification_errors.iter())
                .cloned()
                .collect::<Vec<_>>()
                .join("; ");
            info.error_message = Some(reason);
        }
        if result.rolled_back {
            info.backup_path = None;
        }
        if !self
            .store
            .compare_and_swap_shadow(info, ShadowIndexState::Switching)
            .await?
        {
            return Err(CoordinatorError::InvalidState(format!(
                "shadow index {} left SWITCHING unexpectedly",
                info.id
            )));
        }
        Ok(())
    }

    async fn finish_switch(
        &self,
        info: &ShadowIndexInfo,
        mut result: SwitchResult,
        started: Instant,
        requested_by: &str,
    ) -> SwitchResult {
        result.success = result.errors.is_empty()
            && result.verification_passed
            && info.state == ShadowIndexState::Active;
        result.switch_duration_ms = started.elapsed().as_millis() as u64;

        if result.success {
            info!(
                "Shadow {} is now the served {} index for {} ({} ms)",
                info.id, info.index_type, info.branch_name, result.switch_duration_ms
            );
        }

        let mut record = AuditRecord::new(
            AuditAction::ShadowSwitched,
            requested_by,
            &info.branch_name,
            self.clock.now(),
        )
        .with_metadata(serde_json::json!({
            "shadow_index_id": info.id,
            "index_type": info.index_type,
            "validation_passed": result.validation_passed,
            "verification_passed": result.verification_passed,
            "backup_path": result.backup_path,
            "rolled_back": result.rolled_back,
            "errors": result.errors,
        }));
        if !result.success {
            record = record.failed();
        }
        self.audit(record).await;

        let mut history = self.history.lock();
        history.push_front(SwitchRecord {
            shadow_index_id: info.id,
            branch_name: info.branch_name.clone(),
            index_type: info.index_type,
            requested_by: requested_by.to_string(),
            finished_at: self.clock.now(),
            result: result.clone(),
        });
        history.truncate(self.config.switch_history_limit);

        result
    }

    fn swap_plan(&self, info: &ShadowIndexInfo, backup_current: bool) -> SwapPlan {
        let root = self.index_root(&info.branch_name, info.index_type);
        let id = info.id.simple();
        SwapPlan {
            strategy: info.switch_strategy,
            shadow_path: info.shadow_index_path.clone(),
            current_path: info.current_index_path.clone(),
            backup_path: backup_current.then(|| {
                root.join(format!(
                    "backup_{}_{}",
                    self.clock.now().format("%Y%m%dT%H%M%S"),
                    id
                ))
            }),
            trash_path: root.join(format!(".replaced_{}", id)),
            staging_path: root.join(format!(".staging_{}", id)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries and monitoring
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get_shadow_status(&self, shadow_index_id: Uuid) -> Result<Option<ShadowIndexInfo>> {
        Ok(self.store.get_shadow(shadow_index_id).await?)
    }

    /// Non-terminal shadows, optionally for one branch.
    pub async fn list_active_shadows(&self, branch_name: Option<&str>) -> Result<Vec<ShadowIndexInfo>> {
        let mut shadows: Vec<ShadowIndexInfo> = self
            .store
            .list_shadows(branch_name)
            .await?
            .into_iter()
            .filter(|s| s.state.is_in_flight())
            .collect();
        shadows.sort_by_key(|s| s.started_at);
        Ok(shadows)
    }

    /// Most recent switch attempts first.
    pub fn switch_history(&self, limit: usize) -> Vec<SwitchRecord> {
        self.history.lock().iter().take(limit).cloned().collect()
    }

    /// One monitor pass: drop terminal shadows past retention together with
    /// their directories, and cancel BUILDING shadows that stopped reporting.
    pub async fn monitor_sweep(&self) -> Result<MonitorReport> {
        let now = self.clock.now();
        let retention = self.config.retention();
        let staleness = self.config.staleness();
        let mut report = MonitorReport::default();

        for shadow in self.store.list_shadows(None).await? {
            let idle = now - shadow.last_activity();
            if shadow.state.is_terminal() && idle > retention {
                match self.collect_garbage(&shadow).await {
                    Ok(true) => report.removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Shadow monitor: could not remove {}: {}", shadow.id, e),
                }
            } else if shadow.state == ShadowIndexState::Building && idle > staleness {
                let reason = format!(
                    "no progress reported for {} minutes",
                    idle.num_minutes()
                );
                match self.cancel_shadow_build(shadow.id, "system:shadow-monitor", &reason).await {
                    Ok(true) => report.cancelled_stale += 1,
                    Ok(false) => {}
                    Err(e) => warn!("Shadow monitor: could not cancel {}: {}", shadow.id, e),
                }
            }
        }

        if report.removed > 0 || report.cancelled_stale > 0 {
            info!(
                "Shadow monitor removed {} and cancelled {} stale build(s)",
                report.removed, report.cancelled_stale
            );
        }
        Ok(report)
    }

    async fn collect_garbage(&self, shadow: &ShadowIndexInfo) -> Result<bool> {
        let shadow_path = shadow.shadow_index_path.clone();
        let backup_path = shadow.backup_path.clone();
        self.blocking(move |s| {
            s.remove(&shadow_path)?;
            if let Some(backup) = backup_path {
                s.remove(&backup)?;
            }
            Ok(())
        })
        .await?;
        let deleted = self.store.delete_shadow(shadow.id).await?;
        if deleted {
            debug!("Removed {} shadow {} on {}", shadow.state, shadow.id, shadow.branch_name);
        }
        Ok(deleted)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════════════

    async fn building(
        &self,
        shadow_index_id: Uuid,
        what: &str,
        service_name: &str,
    ) -> Result<Option<ShadowIndexInfo>> {
        match self.store.get_shadow(shadow_index_id).await? {
            Some(info) if info.state == ShadowIndexState::Building => Ok(Some(info)),
            Some(info) => {
                debug!(
                    "Ignoring {} from {} for shadow {} in state {}",
                    what, service_name, shadow_index_id, info.state
                );
                Ok(None)
            }
            None => {
                debug!(
                    "Ignoring {} from {} for unknown shadow {}",
                    what, service_name, shadow_index_id
                );
                Ok(None)
            }
        }
    }

    async fn mark_failed(&self, info: &mut ShadowIndexInfo, error_message: &str) -> Result<bool> {
        let expected = info.state;
        info.transition_to(ShadowIndexState::Failed, self.clock.now())?;
        info.error_message = Some(error_message.to_string());
        Ok(self.store.compare_and_swap_shadow(info, expected).await?)
    }

    async fn remove_dir_logged(&self, path: PathBuf) {
        let shown = path.display().to_string();
        if let Err(e) = self.blocking(move |s| s.remove(&path)).await {
            warn!("Could not remove shadow directory {}: {}", shown, e);
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn IndexSwapper) -> std::io::Result<T> + Send + 'static,
    {
        let swapper = Arc::clone(&self.swapper);
        let joined = tokio::task::spawn_blocking(move || f(swapper.as_ref()))
            .await
            .map_err(|e| anyhow::anyhow!("filesystem task failed: {}", e))?;
        Ok(joined?)
    }

    async fn audit(&self, record: AuditRecord) {
        audit::emit(self.audit.as_ref(), record).await;
    }
}

/// Turn a branch name into a single safe path component: a readable prefix
/// plus a hash of the exact name, so names that sanitize alike stay apart.
fn path_segment(branch_name: &str) -> String {
    let readable: String = branch_name
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(branch_name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    format!("{}-{}", readable, &digest[..PATH_HASH_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segment() {
        let main = path_segment("main");
        assert!(main.starts_with("main-"));
        assert_eq!(main.len(), "main-".len() + PATH_HASH_LEN);
        assert_eq!(main, path_segment("main"));

        assert!(path_segment("feature/new-schema").starts_with("feature_new-schema-"));
        assert!(path_segment("..").starts_with("..-"));
        assert!(!path_segment("").is_empty());
    }

    #[test]
    fn test_path_segment_keeps_similar_names_apart() {
        let names = ["feature/x", "feature_x", "feature x", "feature:x", " feature_x"];
        let segments: std::collections::HashSet<_> =
            names.iter().map(|n| path_segment(n)).collect();
        assert_eq!(segments.len(), names.len());
    }

    #[test]
    fn test_switch_request_defaults_from_partial_json() {
        let req: SwitchRequest =
            serde_json::from_value(serde_json::json!({"force_switch": true})).unwrap();
        assert!(req.force_switch);
        assert!(req.backup_current);
        assert_eq!(req.validation_checks.len(), 2);
        assert_eq!(req.switch_timeout_seconds, None);
    }

    #[test]
    fn test_nested_branch_names_stay_one_directory_deep() {
        let root = std::path::Path::new("/data/indexes").join(path_segment("release/1.2"));
        assert_eq!(root.parent(), Some(std::path::Path::new("/data/indexes")));
    }
}

use branchguard_storage::{BranchStatus, ShadowIndexState};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EventConfig;
use crate::error::Result;
use crate::events::{IndexingEvent, IndexingReport, IndexingStatus, ShadowIndexingReport};
use crate::lock_manager::LockManager;
use crate::merge::{AutoMergeEvaluator, MergeDecision};
use crate::shadow::{ShadowIndexManager, SwitchRequest, SwitchResult};

/// What handling one event did
#[derive(Debug, Clone, Serialize)]
pub struct EventOutcome {
    pub branch_name: String,
    pub mode: &'static str,
    pub indexing_succeeded: bool,
    /// Branch state after handling; `None` for shadow failures, which leave
    /// the branch alone
    pub branch_state: Option<BranchStatus>,
    pub merge: Option<MergeDecision>,
    pub switch: Option<SwitchResult>,
}

/// Consumes `indexing.completed` events.
pub struct IndexingEventHandler {
    locks: Arc<LockManager>,
    shadows: Arc<ShadowIndexManager>,
    auto_merge: AutoMergeEvaluator,
    config: EventConfig,
}

impl IndexingEventHandler {
    pub fn new(
        locks: Arc<LockManager>,
        shadows: Arc<ShadowIndexManager>,
        auto_merge: AutoMergeEvaluator,
        config: EventConfig,
    ) -> Self {
        Self {
            locks,
            shadows,
            auto_merge,
            config,
        }
    }

    /// Entry point for untyped deliveries. Never fails: a payload that
    /// cannot be decoded or handled is reported as unprocessed (`false`)
    /// so the bus can redeliver it.
    pub async fn handle_raw(&self, payload: &serde_json::Value) -> bool {
        let event = match IndexingEvent::from_value(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping indexing event: {}", e);
                return false;
            }
        };
        let branch = event.branch_name().to_string();
        let mode = event.mode();
        match self.handle(event).await {
            Ok(outcome) => {
                debug!(mode, "Indexing event for {} handled: {:?}", branch, outcome);
                true
            }
            Err(e) => {
                warn!(mode, "Indexing event for {} not processed: {}", branch, e);
                false
            }
        }
    }

    pub async fn handle(&self, event: IndexingEvent) -> Result<EventOutcome> {
        match event {
            IndexingEvent::Traditional(report) => self.handle_traditional(report).await,
            IndexingEvent::Shadow(shadow) => self.handle_shadow(shadow).await,
        }
    }

    async fn handle_traditional(&self, report: IndexingReport) -> Result<EventOutcome> {
        let branch = report.branch_name.as_str();
        let current = self.locks.get_branch_state(branch).await?;
        if current.current_state() != BranchStatus::LockedForWrite {
            warn!(
                "Indexing event for {} arrived while branch is {}; handling anyway",
                branch,
                current.current_state()
            );
        }

        let mut outcome = EventOutcome {
            branch_name: report.branch_name.clone(),
            mode: IndexingEvent::TRADITIONAL,
            indexing_succeeded: report.status.is_success(),
            branch_state: None,
            merge: None,
            switch: None,
        };

        match &report.status {
            IndexingStatus::Success => {
                self.locks
                    .complete_indexing(branch, report.actor(), report.indexed_resource_types.as_deref())
                    .await?;
                let (decision, state) = self.try_auto_merge(&report).await?;
                outcome.merge = Some(decision);
                outcome.branch_state = Some(state);
            }
            IndexingStatus::Failed(_) => {
                let record = self
                    .locks
                    .fail_indexing(branch, report.actor(), &report.failure_message())
                    .await?;
                outcome.branch_state = Some(record.current_state);
            }
        }
        Ok(outcome)
    }

    async fn handle_shadow(&self, shadow: ShadowIndexingReport) -> Result<EventOutcome> {
        let ShadowIndexingReport {
            shadow_index_id,
            report,
        } = shadow;
        let mut outcome = EventOutcome {
            branch_name: report.branch_name.clone(),
            mode: IndexingEvent::SHADOW,
            indexing_succeeded: report.status.is_success(),
            branch_state: None,
            merge: None,
            switch: None,
        };

        if !report.status.is_success() {
            self.shadows
                .fail_shadow_build(shadow_index_id, &report.failure_message(), report.actor())
                .await?;
            return Ok(outcome);
        }

        let completed = self
            .shadows
            .complete_shadow_build(
                shadow_index_id,
                report.index_size_bytes,
                report.records_indexed,
                report.actor(),
            )
            .await?;
        if !completed {
            info!(
                "Shadow {} was not BUILDING when its completion arrived",
                shadow_index_id
            );
        }

        if self.config.auto_switch {
            outcome.switch = self.auto_switch(shadow_index_id, &report).await;
        }

        if outcome.switch.as_ref().map_or(false, |s| s.success) {
            let (decision, state) = self.try_auto_merge(&report).await?;
            outcome.merge = Some(decision);
            outcome.branch_state = Some(state);
        }
        Ok(outcome)
    }

    /// Switch right after completion. A failed switch is logged and left
    /// for a manual retry; the shadow stays switchable.
    async fn auto_switch(&self, shadow_index_id: Uuid, report: &IndexingReport) -> Option<SwitchResult> {
        match self.shadows.get_shadow_status(shadow_index_id).await {
            Ok(Some(info)) if info.state == ShadowIndexState::Built => {}
            Ok(Some(info)) => {
                debug!(
                    "Skipping auto-switch of shadow {} in state {}",
                    shadow_index_id, info.state
                );
                return None;
            }
            Ok(None) => return None,
            Err(e) => {
                warn!("Auto-switch lookup for {} failed: {}", shadow_index_id, e);
                return None;
            }
        }

        let request = SwitchRequest {
            force_switch: false,
            validation_checks: self.config.auto_switch_checks.clone(),
            backup_current: self.config.auto_switch_backup,
            switch_timeout_seconds: None,
        };
        match self
            .shadows
            .request_atomic_switch(shadow_index_id, request, report.actor())
            .await
        {
            Ok(result) => {
                if !result.success {
                    warn!(
                        "Auto-switch of shadow {} did not complete: {:?} {:?}",
                        shadow_index_id, result.validation_errors, result.errors
                    );
                }
                Some(result)
            }
            Err(e) => {
                warn!("Auto-switch of shadow {} failed: {}", shadow_index_id, e);
                None
            }
        }
    }

    /// Evaluate auto-merge and apply it. A merge that fails to apply puts
    /// the branch in ERROR instead of leaving it half-done.
    async fn try_auto_merge(&self, report: &IndexingReport) -> Result<(MergeDecision, BranchStatus)> {
        let branch = report.branch_name.as_str();
        let state = self.locks.get_branch_state(branch).await?.current_state();
        let decision = self
            .auto_merge
            .evaluate(branch, state, &report.validation_results)
            .await;

        if !decision.should_merge() {
            debug!("Auto-merge of {} skipped: {:?}", branch, decision);
            return Ok((decision, state));
        }

        let actor = self.auto_merge.config().merge_actor.clone();
        match self.locks.mark_merged(branch, &actor).await {
            Ok(record) => {
                info!("Auto-merged {} after indexing", branch);
                Ok((decision, record.current_state))
            }
            Err(e) => {
                error!("Auto-merge of {} failed, marking branch ERROR: {}", branch, e);
                let record = self
                    .locks
                    .mark_error(branch, &actor, &format!("auto-merge failed: {}", e))
                    .await?;
                Ok((decision, record.current_state))
            }
        }
    }
}

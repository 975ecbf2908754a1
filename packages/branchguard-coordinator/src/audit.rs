//! Audit trail for state-changing operations.
//!
//! Records go to an [`AuditSink`]. A failing sink is logged and otherwise
//! ignored; it never fails the operation being audited.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    LockAcquired,
    LockReleased,
    LockForceUnlocked,
    LockExpired,
    LockTtlExtended,
    IndexingCompleted,
    IndexingFailed,
    BranchMerged,
    BranchRecovered,
    BranchErrored,
    ShadowBuildStarted,
    ShadowBuildCancelled,
    ShadowBuildFailed,
    ShadowSwitched,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LockAcquired => "lock_acquired",
            AuditAction::LockReleased => "lock_released",
            AuditAction::LockForceUnlocked => "lock_force_unlocked",
            AuditAction::LockExpired => "lock_expired",
            AuditAction::LockTtlExtended => "lock_ttl_extended",
            AuditAction::IndexingCompleted => "indexing_completed",
            AuditAction::IndexingFailed => "indexing_failed",
            AuditAction::BranchMerged => "branch_merged",
            AuditAction::BranchRecovered => "branch_recovered",
            AuditAction::BranchErrored => "branch_errored",
            AuditAction::ShadowBuildStarted => "shadow_build_started",
            AuditAction::ShadowBuildCancelled => "shadow_build_cancelled",
            AuditAction::ShadowBuildFailed => "shadow_build_failed",
            AuditAction::ShadowSwitched => "shadow_switched",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub actor: String,
    pub branch: String,
    pub metadata: serde_json::Value,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        action: AuditAction,
        actor: impl Into<String>,
        branch: impl Into<String>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action,
            actor: actor.into(),
            branch: branch.into(),
            metadata: serde_json::Value::Null,
            success: true,
            recorded_at,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()>;
}

/// Emits audit records as structured `tracing` events on `branchguard::audit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()> {
        tracing::info!(
            target: "branchguard::audit",
            action = record.action.as_str(),
            actor = %record.actor,
            branch = %record.branch,
            success = record.success,
            metadata = %record.metadata,
            "audit"
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.records.lock().iter().map(|r| r.action).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) -> anyhow::Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Send `record` to `sink`, logging instead of propagating a failure.
pub(crate) async fn emit(sink: &dyn AuditSink, record: AuditRecord) {
    let action = record.action;
    if let Err(e) = sink.record(record).await {
        warn!("Audit sink rejected {} record: {:#}", action, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn record(&self, _record: AuditRecord) -> anyhow::Result<()> {
            anyhow::bail!("siem unreachable")
        }
    }

    #[tokio::test]
    async fn test_emit_swallows_sink_failure() {
        let record = AuditRecord::new(AuditAction::LockAcquired, "svc", "main", Utc::now());
        emit(&BrokenSink, record).await;
    }

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemoryAuditSink::new();
        emit(
            &sink,
            AuditRecord::new(AuditAction::BranchMerged, "auto", "main", Utc::now())
                .with_metadata(serde_json::json!({"validation_passed": true})),
        )
        .await;

        assert_eq!(sink.actions(), vec![AuditAction::BranchMerged]);
        assert_eq!(sink.records()[0].metadata["validation_passed"], true);
    }
}

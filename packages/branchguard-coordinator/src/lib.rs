/*
 * branchguard coordinator
 *
 * Mutual exclusion over schema branches while indexing jobs rebuild derived
 * data, and the hand-off from a freshly built shadow index to the served one.
 *
 * Architecture:
 * - LockManager: atomic conflict-checked grants, TTL + heartbeat sweeps
 * - BranchStateMachine: ACTIVE / LOCKED_FOR_WRITE / READY / ERROR
 * - ShadowIndexManager: lock-free builds, locked atomic switch with rollback
 * - IndexingEventHandler: indexing.completed events, auto-switch, auto-merge
 * - Coordinator: owns the above plus background tasks
 */

pub mod audit;
pub mod branch_state;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_handler;
pub mod events;
pub mod lock_manager;
pub mod merge;
pub mod monitor;
pub mod service;
pub mod shadow;

pub use audit::{AuditAction, AuditRecord, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use branch_state::{next_state, BranchStateMachine, BranchTransition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AutoMergeConfig, ConfigError, CoordinatorConfig, EventConfig, LockConfig, ShadowConfig,
};
pub use error::{CoordinatorError, ErrorCategory, Result};
pub use event_handler::{EventOutcome, IndexingEventHandler};
pub use events::{IndexingEvent, IndexingReport, IndexingStatus, ShadowIndexingReport, ValidationResults};
pub use lock_manager::{
    AcquireLockRequest, BranchStateInfo, LockHealthReport, LockManager, SweepReport,
};
pub use merge::{AutoMergeEvaluator, MergeConflictChecker, MergeDecision, NoMergeConflicts, SkipReason};
pub use service::{Collaborators, Coordinator};
pub use shadow::{
    FsIndexSwapper, IndexSwapper, MonitorReport, ShadowIndexManager, SwitchRecord, SwitchRequest,
    SwitchResult, ValidationCheck,
};

pub use branchguard_storage as storage;

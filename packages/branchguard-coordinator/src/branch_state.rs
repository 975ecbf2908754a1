use crate::error::{CoordinatorError, Result};
use branchguard_storage::{BranchStateRecord, BranchStatus};
use chrono::{DateTime, Utc};

/// Events that move a branch between states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchTransition {
    /// An INDEXING lock was granted
    BeginIndexing,
    /// The last INDEXING lock went away
    FinishIndexing,
    /// Indexed branch merged back
    Merge,
    /// Indexing reported a failure
    Fail,
    /// Operator cleared an error
    Recover,
}

impl BranchTransition {
    pub fn all() -> [BranchTransition; 5] {
        [
            BranchTransition::BeginIndexing,
            BranchTransition::FinishIndexing,
            BranchTransition::Merge,
            BranchTransition::Fail,
            BranchTransition::Recover,
        ]
    }
}

/// Transition table.
///
/// `indexing_locks_remain` only matters for `Recover`, which returns the
/// branch to LOCKED_FOR_WRITE when INDEXING locks are still held.
pub fn next_state(
    from: BranchStatus,
    transition: BranchTransition,
    indexing_locks_remain: bool,
) -> Result<BranchStatus> {
    use BranchStatus::*;
    use BranchTransition::*;

    let to = match (from, transition) {
        (_, BeginIndexing) => LockedForWrite,
        (LockedForWrite, FinishIndexing) => Ready,
        (Ready, Merge) => Active,
        (_, Fail) => Error,
        (Error, Recover) if indexing_locks_remain => LockedForWrite,
        (Error, Recover) => Active,
        (from, FinishIndexing) => return Err(CoordinatorError::invalid_transition(from, Ready)),
        (from, Merge) => return Err(CoordinatorError::invalid_transition(from, Active)),
        (from, Recover) => return Err(CoordinatorError::invalid_transition(from, Active)),
    };
    Ok(to)
}

/// Branch state machine; wraps one record and applies transitions to it
pub struct BranchStateMachine {
    record: BranchStateRecord,
}

impl BranchStateMachine {
    pub fn new(record: BranchStateRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &BranchStateRecord {
        &self.record
    }

    pub fn into_record(self) -> BranchStateRecord {
        self.record
    }

    pub fn state(&self) -> BranchStatus {
        self.record.current_state
    }

    /// Transition: * → LOCKED_FOR_WRITE
    ///
    /// Idempotent while already locked; the original start time and service
    /// are kept.
    pub fn begin_indexing(&mut self, service: &str, now: DateTime<Utc>) -> Result<()> {
        let from = self.record.current_state;
        let to = next_state(from, BranchTransition::BeginIndexing, true)?;

        if from != BranchStatus::LockedForWrite {
            self.record.indexing_started_at = Some(now);
            self.record.indexing_completed_at = None;
            self.record.indexing_service = Some(service.to_string());
            self.record.error_message = None;
        }
        self.record.current_state = to;
        self.record.updated_at = now;
        Ok(())
    }

    /// Transition: LOCKED_FOR_WRITE → READY
    pub fn finish_indexing(&mut self, now: DateTime<Utc>) -> Result<()> {
        let to = next_state(self.record.current_state, BranchTransition::FinishIndexing, false)?;
        self.record.current_state = to;
        self.record.indexing_completed_at = Some(now);
        self.record.updated_at = now;
        Ok(())
    }

    /// Transition: READY → ACTIVE
    pub fn merge(&mut self, merged_by: &str, now: DateTime<Utc>) -> Result<()> {
        let to = next_state(self.record.current_state, BranchTransition::Merge, false)?;
        self.record.current_state = to;
        self.record.last_merged_at = Some(now);
        self.record.merged_by = Some(merged_by.to_string());
        self.record.updated_at = now;
        Ok(())
    }

    /// Transition: * → ERROR
    pub fn fail(&mut self, message: &str, now: DateTime<Utc>) -> Result<()> {
        let to = next_state(self.record.current_state, BranchTransition::Fail, false)?;
        self.record.current_state = to;
        self.record.error_message = Some(message.to_string());
        self.record.updated_at = now;
        Ok(())
    }

    /// Transition: ERROR → ACTIVE | LOCKED_FOR_WRITE
    pub fn recover(&mut self, indexing_locks_remain: bool, now: DateTime<Utc>) -> Result<()> {
        let to = next_state(
            self.record.current_state,
            BranchTransition::Recover,
            indexing_locks_remain,
        )?;
        self.record.current_state = to;
        self.record.error_message = None;
        self.record.updated_at = now;
        Ok(())
    }
}

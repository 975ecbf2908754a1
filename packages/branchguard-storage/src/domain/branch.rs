//! Branch write-availability record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StorageError};

/// Write-availability of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchStatus {
    /// Writable, no indexing in flight
    Active,
    /// At least one INDEXING lock is held
    LockedForWrite,
    /// Indexing finished, awaiting merge
    Ready,
    /// Failure reported; needs explicit recovery
    Error,
}

impl BranchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchStatus::Active => "ACTIVE",
            BranchStatus::LockedForWrite => "LOCKED_FOR_WRITE",
            BranchStatus::Ready => "READY",
            BranchStatus::Error => "ERROR",
        }
    }

    pub fn all() -> [BranchStatus; 4] {
        [
            BranchStatus::Active,
            BranchStatus::LockedForWrite,
            BranchStatus::Ready,
            BranchStatus::Error,
        ]
    }
}

impl FromStr for BranchStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(BranchStatus::Active),
            "LOCKED_FOR_WRITE" => Ok(BranchStatus::LockedForWrite),
            "READY" => Ok(BranchStatus::Ready),
            "ERROR" => Ok(BranchStatus::Error),
            _ => Err(StorageError::serialization(format!(
                "Invalid branch status: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted state of one branch.
///
/// Active locks are not stored here; they are queried from the lock table.
/// `version` is the optimistic-concurrency counter: 0 means the record has
/// never been written, and every successful compare-and-swap bumps it by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStateRecord {
    pub branch_name: String,
    pub current_state: BranchStatus,
    pub indexing_started_at: Option<DateTime<Utc>>,
    pub indexing_completed_at: Option<DateTime<Utc>>,
    pub indexing_service: Option<String>,
    pub error_message: Option<String>,
    pub last_merged_at: Option<DateTime<Utc>>,
    pub merged_by: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl BranchStateRecord {
    /// Implicit record for a branch seen for the first time.
    pub fn new(branch_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            branch_name: branch_name.into(),
            current_state: BranchStatus::Active,
            indexing_started_at: None,
            indexing_completed_at: None,
            indexing_service: None,
            error_message: None,
            last_merged_at: None,
            merged_by: None,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_active_and_unpersisted() {
        let record = BranchStateRecord::new("main", Utc::now());
        assert_eq!(record.current_state, BranchStatus::Active);
        assert_eq!(record.version, 0);
        assert!(!record.is_persisted());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "locked_for_write".parse::<BranchStatus>().unwrap(),
            BranchStatus::LockedForWrite
        );
        assert!("MERGED".parse::<BranchStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_screaming_case() {
        let json = serde_json::to_string(&BranchStatus::LockedForWrite).unwrap();
        assert_eq!(json, "\"LOCKED_FOR_WRITE\"");
    }
}

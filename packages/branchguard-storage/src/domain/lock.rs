//! Branch lock record and the conflict rule every store applies.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, StorageError};

/// Kind of work a lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    Manual,
    Indexing,
    SchemaChange,
    Maintenance,
    Backup,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Manual => "MANUAL",
            LockType::Indexing => "INDEXING",
            LockType::SchemaChange => "SCHEMA_CHANGE",
            LockType::Maintenance => "MAINTENANCE",
            LockType::Backup => "BACKUP",
        }
    }

    /// Read-compatible locks only read the branch; two of them never conflict.
    pub fn is_read_compatible(&self) -> bool {
        matches!(self, LockType::Backup)
    }
}

impl FromStr for LockType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MANUAL" => Ok(LockType::Manual),
            "INDEXING" => Ok(LockType::Indexing),
            "SCHEMA_CHANGE" => Ok(LockType::SchemaChange),
            "MAINTENANCE" => Ok(LockType::Maintenance),
            "BACKUP" => Ok(LockType::Backup),
            _ => Err(StorageError::serialization(format!(
                "Invalid lock type: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Granularity of a lock: the whole branch, or one resource type on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockScope {
    Branch,
    ResourceType,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Branch => "BRANCH",
            LockScope::ResourceType => "RESOURCE_TYPE",
        }
    }
}

impl FromStr for LockScope {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BRANCH" => Ok(LockScope::Branch),
            "RESOURCE_TYPE" => Ok(LockScope::ResourceType),
            _ => Err(StorageError::serialization(format!(
                "Invalid lock scope: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One outstanding lock grant on a branch.
///
/// Identity fields never change after creation. Only `is_active`,
/// `last_heartbeat`, `expires_at` and the release bookkeeping mutate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchLock {
    pub id: Uuid,
    pub branch_name: String,
    pub lock_type: LockType,
    pub lock_scope: LockScope,
    /// Present iff `lock_scope == ResourceType`
    pub resource_type: Option<String>,
    /// Optional finer scoping inside a resource type
    pub resource_id: Option<String>,
    pub locked_by: String,
    pub reason: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub heartbeat_enabled: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub released_by: Option<String>,
}

impl BranchLock {
    /// Lock over the whole branch.
    pub fn branch_scoped(
        branch_name: impl Into<String>,
        lock_type: LockType,
        locked_by: impl Into<String>,
        reason: impl Into<String>,
        acquired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            branch_name: branch_name.into(),
            lock_type,
            lock_scope: LockScope::Branch,
            resource_type: None,
            resource_id: None,
            locked_by: locked_by.into(),
            reason: reason.into(),
            acquired_at,
            expires_at: None,
            heartbeat_enabled: false,
            last_heartbeat: None,
            is_active: true,
            released_at: None,
            released_by: None,
        }
    }

    /// Lock over a single resource type on the branch.
    pub fn resource_scoped(
        branch_name: impl Into<String>,
        lock_type: LockType,
        resource_type: impl Into<String>,
        locked_by: impl Into<String>,
        reason: impl Into<String>,
        acquired_at: DateTime<Utc>,
    ) -> Self {
        let mut lock = Self::branch_scoped(branch_name, lock_type, locked_by, reason, acquired_at);
        lock.lock_scope = LockScope::ResourceType;
        lock.resource_type = Some(resource_type.into());
        lock
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Enable heartbeat tracking; the acquisition time counts as the first beat.
    pub fn with_heartbeat(mut self, enabled: bool) -> Self {
        self.heartbeat_enabled = enabled;
        self.last_heartbeat = if enabled {
            Some(self.acquired_at)
        } else {
            None
        };
        self
    }

    /// Check the record is well-formed before it reaches a store.
    pub fn validate(&self) -> Result<()> {
        if self.branch_name.trim().is_empty() {
            return Err(StorageError::validation("branch_name must not be empty"));
        }
        if self.locked_by.trim().is_empty() {
            return Err(StorageError::validation("locked_by must not be empty"));
        }
        match (self.lock_scope, &self.resource_type) {
            (LockScope::Branch, Some(rt)) => Err(StorageError::validation(format!(
                "BRANCH scoped lock must not carry a resource_type (got '{}')",
                rt
            ))),
            (LockScope::ResourceType, None) => Err(StorageError::validation(
                "RESOURCE_TYPE scoped lock requires a resource_type",
            )),
            (LockScope::ResourceType, Some(rt)) if rt.trim().is_empty() => Err(
                StorageError::validation("resource_type must not be empty"),
            ),
            _ => Ok(()),
        }
    }

    pub fn is_indexing(&self) -> bool {
        self.lock_type == LockType::Indexing
    }

    /// Whether holding `self` and `other` at the same time is forbidden.
    ///
    /// BRANCH scope overlaps everything on the branch. Two RESOURCE_TYPE locks
    /// overlap only on the same resource type, and when both name a
    /// `resource_id`, only on the same id.
    pub fn conflicts_with(&self, other: &BranchLock) -> bool {
        if !self.is_active || !other.is_active || self.id == other.id {
            return false;
        }
        if self.branch_name != other.branch_name {
            return false;
        }
        if self.lock_type.is_read_compatible() && other.lock_type.is_read_compatible() {
            return false;
        }

        match (self.lock_scope, other.lock_scope) {
            (LockScope::Branch, _) | (_, LockScope::Branch) => true,
            (LockScope::ResourceType, LockScope::ResourceType) => {
                if self.resource_type != other.resource_type {
                    return false;
                }
                match (&self.resource_id, &other.resource_id) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                }
            }
        }
    }

    /// TTL check. A lock without `expires_at` never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    /// Liveness check. Locks with heartbeat disabled are exempt.
    pub fn is_heartbeat_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if !self.heartbeat_enabled {
            return false;
        }
        let last = self.last_heartbeat.unwrap_or(self.acquired_at);
        now - last > timeout
    }

    /// Mark the lock released.
    pub fn deactivate(&mut self, released_by: impl Into<String>, released_at: DateTime<Utc>) {
        self.is_active = false;
        self.released_at = Some(released_at);
        self.released_by = Some(released_by.into());
    }
}

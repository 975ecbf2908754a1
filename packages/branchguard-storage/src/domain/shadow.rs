//! Shadow index build records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, StorageError};

/// Kind of derived index built for a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexType {
    FullText,
    Vector,
    Graph,
    Metadata,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::FullText => "FULL_TEXT",
            IndexType::Vector => "VECTOR",
            IndexType::Graph => "GRAPH",
            IndexType::Metadata => "METADATA",
        }
    }

    /// Lowercase form used in directory names and switch lock resource types.
    pub fn slug(&self) -> &'static str {
        match self {
            IndexType::FullText => "full_text",
            IndexType::Vector => "vector",
            IndexType::Graph => "graph",
            IndexType::Metadata => "metadata",
        }
    }
}

impl FromStr for IndexType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FULL_TEXT" => Ok(IndexType::FullText),
            "VECTOR" => Ok(IndexType::Vector),
            "GRAPH" => Ok(IndexType::Graph),
            "METADATA" => Ok(IndexType::Metadata),
            _ => Err(StorageError::serialization(format!(
                "Invalid index type: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of one shadow build
///
/// ```text
/// PREPARING -> BUILDING -> BUILT -> SWITCHING -> ACTIVE
///      \___________\_________\__________\______> FAILED | CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShadowIndexState {
    Preparing,
    Building,
    Built,
    Switching,
    Active,
    Failed,
    Cancelled,
}

impl ShadowIndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowIndexState::Preparing => "PREPARING",
            ShadowIndexState::Building => "BUILDING",
            ShadowIndexState::Built => "BUILT",
            ShadowIndexState::Switching => "SWITCHING",
            ShadowIndexState::Active => "ACTIVE",
            ShadowIndexState::Failed => "FAILED",
            ShadowIndexState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShadowIndexState::Active | ShadowIndexState::Failed | ShadowIndexState::Cancelled
        )
    }

    /// Non-terminal states block another build for the same branch and index type.
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: ShadowIndexState) -> bool {
        use ShadowIndexState::*;

        match (self, next) {
            (Preparing, Building) | (Building, Built) | (Built, Switching) | (Switching, Active) => {
                true
            }
            (from, Failed) | (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl FromStr for ShadowIndexState {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PREPARING" => Ok(ShadowIndexState::Preparing),
            "BUILDING" => Ok(ShadowIndexState::Building),
            "BUILT" => Ok(ShadowIndexState::Built),
            "SWITCHING" => Ok(ShadowIndexState::Switching),
            "ACTIVE" => Ok(ShadowIndexState::Active),
            "FAILED" => Ok(ShadowIndexState::Failed),
            "CANCELLED" => Ok(ShadowIndexState::Cancelled),
            _ => Err(StorageError::serialization(format!(
                "Invalid shadow index state: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for ShadowIndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the shadow directory replaces the current one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwitchStrategy {
    /// Single directory rename; relies on the filesystem's atomic rename
    #[default]
    AtomicRename,
    /// Copy to a temp directory, move the old one away, rename temp into place
    CopyAndReplace,
}

impl SwitchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchStrategy::AtomicRename => "ATOMIC_RENAME",
            SwitchStrategy::CopyAndReplace => "COPY_AND_REPLACE",
        }
    }
}

impl FromStr for SwitchStrategy {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ATOMIC_RENAME" => Ok(SwitchStrategy::AtomicRename),
            "COPY_AND_REPLACE" => Ok(SwitchStrategy::CopyAndReplace),
            _ => Err(StorageError::serialization(format!(
                "Invalid switch strategy: {}",
                s
            ))),
        }
    }
}

impl fmt::Display for SwitchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One shadow build attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowIndexInfo {
    pub id: Uuid,
    pub branch_name: String,
    pub index_type: IndexType,
    pub resource_types: BTreeSet<String>,
    pub state: ShadowIndexState,
    pub service_name: String,
    pub shadow_index_path: PathBuf,
    pub current_index_path: PathBuf,
    pub switch_strategy: SwitchStrategy,
    pub build_progress_percent: f64,
    pub record_count: Option<u64>,
    pub index_size_bytes: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub switched_at: Option<DateTime<Utc>>,
    /// Where the previous current index was moved during the last switch
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Opaque builder parameters, passed through untouched
    #[serde(default)]
    pub build_config: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl ShadowIndexInfo {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        branch_name: impl Into<String>,
        index_type: IndexType,
        resource_types: impl IntoIterator<Item = String>,
        service_name: impl Into<String>,
        shadow_index_path: PathBuf,
        current_index_path: PathBuf,
        switch_strategy: SwitchStrategy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            branch_name: branch_name.into(),
            index_type,
            resource_types: resource_types.into_iter().collect(),
            state: ShadowIndexState::Preparing,
            service_name: service_name.into(),
            shadow_index_path,
            current_index_path,
            switch_strategy,
            build_progress_percent: 0.0,
            record_count: None,
            index_size_bytes: None,
            started_at: now,
            completed_at: None,
            switched_at: None,
            backup_path: None,
            error_message: None,
            build_config: serde_json::Value::Null,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting anything outside the transition table.
    pub fn transition_to(&mut self, next: ShadowIndexState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(StorageError::validation(format!(
                "illegal shadow index transition {} -> {} for {}",
                self.state, next, self.id
            )));
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }

    /// Most recent timestamp the builder touched this record.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.updated_at.max(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ShadowIndexInfo {
        ShadowIndexInfo::new(
            Uuid::new_v4(),
            "main",
            IndexType::FullText,
            vec!["object_type".to_string()],
            "svc",
            PathBuf::from("/tmp/shadow"),
            PathBuf::from("/tmp/current"),
            SwitchStrategy::AtomicRename,
            Utc::now(),
        )
    }

    #[test]
    fn test_forward_path() {
        let mut info = sample();
        let now = Utc::now();
        for next in [
            ShadowIndexState::Building,
            ShadowIndexState::Built,
            ShadowIndexState::Switching,
            ShadowIndexState::Active,
        ] {
            info.transition_to(next, now).unwrap();
        }
        assert!(info.state.is_terminal());
    }

    #[test]
    fn test_no_skipping_states() {
        let mut info = sample();
        assert!(info
            .transition_to(ShadowIndexState::Built, Utc::now())
            .is_err());
        assert_eq!(info.state, ShadowIndexState::Preparing);
    }

    #[test]
    fn test_failure_reachable_only_from_non_terminal() {
        for state in [
            ShadowIndexState::Preparing,
            ShadowIndexState::Building,
            ShadowIndexState::Built,
            ShadowIndexState::Switching,
        ] {
            assert!(state.can_transition_to(ShadowIndexState::Failed));
            assert!(state.can_transition_to(ShadowIndexState::Cancelled));
        }
        for state in [
            ShadowIndexState::Active,
            ShadowIndexState::Failed,
            ShadowIndexState::Cancelled,
        ] {
            assert!(!state.can_transition_to(ShadowIndexState::Failed));
            assert!(!state.can_transition_to(ShadowIndexState::Building));
        }
    }

    #[test]
    fn test_index_type_slug() {
        assert_eq!(IndexType::FullText.slug(), "full_text");
        assert_eq!("vector".parse::<IndexType>().unwrap(), IndexType::Vector);
    }
}

//! `indexing.completed` event payloads, decoded once at the boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CoordinatorError, Result};

const MODE_FIELD: &str = "indexing_mode";

/// Indexing result reported by the external indexing service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "indexing_mode", rename_all = "snake_case")]
pub enum IndexingEvent {
    /// Indexed in place under INDEXING locks
    Traditional(IndexingReport),
    /// Built into a shadow index
    Shadow(ShadowIndexingReport),
}

impl IndexingEvent {
    /// Decode a raw payload. A missing `indexing_mode` means traditional.
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut value = value.clone();
        if let Value::Object(fields) = &mut value {
            fields
                .entry(MODE_FIELD)
                .or_insert_with(|| Value::String(Self::TRADITIONAL.to_string()));
        }
        serde_json::from_value(value)
            .map_err(|e| CoordinatorError::Validation(format!("malformed indexing event: {}", e)))
    }

    pub fn report(&self) -> &IndexingReport {
        match self {
            IndexingEvent::Traditional(report) => report,
            IndexingEvent::Shadow(shadow) => &shadow.report,
        }
    }

    pub fn branch_name(&self) -> &str {
        &self.report().branch_name
    }

    pub const TRADITIONAL: &'static str = "traditional";
    pub const SHADOW: &'static str = "shadow";

    /// Value of `indexing_mode` this event was decoded from
    pub fn mode(&self) -> &'static str {
        match self {
            IndexingEvent::Traditional(_) => Self::TRADITIONAL,
            IndexingEvent::Shadow(_) => Self::SHADOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingReport {
    pub branch_name: String,
    pub status: IndexingStatus,
    #[serde(default)]
    pub records_indexed: u64,
    #[serde(default)]
    pub index_size_bytes: u64,
    /// Restricts completion to these resource-type locks
    #[serde(default)]
    pub indexed_resource_types: Option<Vec<String>>,
    #[serde(default)]
    pub validation_results: ValidationResults,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Reporting service; used as the actor on locks and audit records
    #[serde(default)]
    pub service_name: Option<String>,
}

impl IndexingReport {
    pub fn actor(&self) -> &str {
        self.service_name.as_deref().unwrap_or("indexing-service")
    }

    /// Message to record when the status is a failure.
    pub fn failure_message(&self) -> String {
        match (&self.status, &self.error_message) {
            (_, Some(message)) => message.clone(),
            (IndexingStatus::Failed(status), None) => format!("indexing reported status '{}'", status),
            (IndexingStatus::Success, None) => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowIndexingReport {
    pub shadow_index_id: Uuid,
    #[serde(flatten)]
    pub report: IndexingReport,
}

/// `"success"` or any other status string, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IndexingStatus {
    Success,
    Failed(String),
}

impl IndexingStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, IndexingStatus::Success)
    }
}

impl From<String> for IndexingStatus {
    fn from(status: String) -> Self {
        if status.eq_ignore_ascii_case("success") {
            IndexingStatus::Success
        } else {
            IndexingStatus::Failed(status)
        }
    }
}

impl From<IndexingStatus> for String {
    fn from(status: IndexingStatus) -> Self {
        match status {
            IndexingStatus::Success => "success".to_string(),
            IndexingStatus::Failed(status) => status,
        }
    }
}

/// Validation summary attached by the indexing service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResults {
    #[serde(default)]
    pub passed: bool,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_mode_is_traditional() {
        let event = IndexingEvent::from_value(&json!({
            "branch_name": "main",
            "status": "success",
            "records_indexed": 120,
            "validation_results": {"passed": true, "checked": 3}
        }))
        .unwrap();

        let IndexingEvent::Traditional(report) = &event else {
            panic!("expected traditional, got {:?}", event);
        };
        assert!(report.status.is_success());
        assert!(report.validation_results.passed);
        assert_eq!(report.validation_results.details["checked"], 3);
        assert_eq!(report.actor(), "indexing-service");
        assert_eq!(event.mode(), "traditional");
    }

    #[test]
    fn test_shadow_event() {
        let id = Uuid::new_v4();
        let event = IndexingEvent::from_value(&json!({
            "indexing_mode": "shadow",
            "shadow_index_id": id,
            "branch_name": "feature-x",
            "status": "success",
            "records_indexed": 10,
            "index_size_bytes": 2048,
            "service_name": "search-indexer"
        }))
        .unwrap();
        assert_eq!(event.mode(), "shadow");

        match event {
            IndexingEvent::Shadow(shadow) => {
                assert_eq!(shadow.shadow_index_id, id);
                assert_eq!(shadow.report.index_size_bytes, 2048);
                assert_eq!(shadow.report.actor(), "search-indexer");
            }
            other => panic!("expected shadow, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_status_keeps_text() {
        let event = IndexingEvent::from_value(&json!({
            "branch_name": "main",
            "status": "timeout"
        }))
        .unwrap();
        assert_eq!(
            event.report().status,
            IndexingStatus::Failed("timeout".to_string())
        );
        assert_eq!(
            event.report().failure_message(),
            "indexing reported status 'timeout'"
        );
        assert!(!event.report().validation_results.passed);
    }

    #[test]
    fn test_rejects_unknown_mode_and_missing_shadow_id() {
        assert!(IndexingEvent::from_value(&json!({
            "indexing_mode": "streaming",
            "branch_name": "main",
            "status": "success"
        }))
        .is_err());
        assert!(IndexingEvent::from_value(&json!({
            "indexing_mode": "shadow",
            "branch_name": "main",
            "status": "success"
        }))
        .is_err());
    }
}

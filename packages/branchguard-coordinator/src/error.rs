use branchguard_storage::{BranchStatus, ErrorKind, StorageError};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Lock conflict on branch '{branch}': held by {conflicting:?}")]
    LockConflict { branch: String, conflicting: Vec<Uuid> },

    #[error("Shadow index conflict on branch '{branch}' ({index_type}): {existing} is still in flight")]
    ShadowIndexConflict {
        branch: String,
        index_type: String,
        existing: Uuid,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Lock not found: {0}")]
    LockNotFound(Uuid),

    #[error("Shadow index not found: {0}")]
    ShadowIndexNotFound(Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoordinatorError {
    pub fn invalid_transition(from: BranchStatus, to: BranchStatus) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn validation<E: std::fmt::Display>(e: E) -> Self {
        Self::Validation(e.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            CoordinatorError::LockConflict { .. } | CoordinatorError::ShadowIndexConflict { .. } => {
                ErrorCategory::Conflict
            }
            CoordinatorError::InvalidStateTransition { .. }
            | CoordinatorError::InvalidState(_)
            | CoordinatorError::Validation(_) => ErrorCategory::InvalidState,
            CoordinatorError::LockNotFound(_) | CoordinatorError::ShadowIndexNotFound(_) => {
                ErrorCategory::NotFound
            }
            CoordinatorError::Storage(e) => match e.kind {
                ErrorKind::Validation => ErrorCategory::InvalidState,
                kind if kind.is_transient() => ErrorCategory::Transient,
                _ => ErrorCategory::Fatal,
            },
            CoordinatorError::Io(_) | CoordinatorError::Timeout(_) => ErrorCategory::Transient,
            CoordinatorError::Config(_) | CoordinatorError::Other(_) => ErrorCategory::Fatal,
        }
    }

    /// Status code the HTTP layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self.category() {
            ErrorCategory::Conflict => 409,
            ErrorCategory::InvalidState => 400,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Transient => 503,
            ErrorCategory::Fatal => 500,
        }
    }
}

/// Coarse error classes callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Someone else holds the resource - back off and retry
    Conflict,
    /// Caller invoked an operation out of sequence - do not retry
    InvalidState,
    /// Nothing to act on
    NotFound,
    /// Store or filesystem hiccup - retry later
    Transient,
    /// Needs an operator
    Fatal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::InvalidState => "invalid_state",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        let conflict = CoordinatorError::LockConflict {
            branch: "main".to_string(),
            conflicting: vec![Uuid::new_v4()],
        };
        assert_eq!(conflict.http_status(), 409);

        let transition =
            CoordinatorError::invalid_transition(BranchStatus::Active, BranchStatus::Ready);
        assert_eq!(transition.http_status(), 400);
        assert_eq!(
            transition.to_string(),
            "Invalid state transition: ACTIVE -> READY"
        );

        assert_eq!(CoordinatorError::LockNotFound(Uuid::nil()).http_status(), 404);
        assert_eq!(
            CoordinatorError::from(StorageError::database("locked")).http_status(),
            503
        );
        assert_eq!(
            CoordinatorError::from(anyhow::anyhow!("bug")).http_status(),
            500
        );
    }

    #[test]
    fn test_storage_validation_maps_to_invalid_state() {
        let err = CoordinatorError::from(StorageError::validation("resource_type required"));
        assert_eq!(err.category(), ErrorCategory::InvalidState);
    }
}

//! Coordinator configuration
//!
//! Loaded from a versioned YAML file:
//!
//! ```yaml
//! version: 1
//! locks:
//!   default_ttl_seconds: 3600
//!   heartbeat_timeout_seconds: 300
//! shadow:
//!   base_path: /var/lib/branchguard/indexes
//!   switch_strategy: ATOMIC_RENAME
//! auto_merge:
//!   enabled: true
//!   protected_branches: [main]
//! events:
//!   auto_switch: true
//! ```
//!
//! Every section and field is optional and falls back to its default.

use branchguard_storage::SwitchStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::shadow::ValidationCheck;

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Range validation error
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}. {hint}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    /// Two fields disagree with each other
    #[error("Configuration conflict: {issue}. Fix: {fix}")]
    Conflict { issue: String, fix: String },

    /// Missing version field in YAML
    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    /// Unsupported version
    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Create a range error with a hint
    pub fn range_with_hint(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

fn check_range<T>(field: &str, value: T, min: T, max: T, hint: &str) -> ConfigResult<()>
where
    T: PartialOrd + ToString + Copy,
{
    if value < min || value > max {
        return Err(ConfigError::range_with_hint(field, value, min, max, hint));
    }
    Ok(())
}

// ============================================================================
// Sections
// ============================================================================

/// Lock TTL, heartbeat and sweep settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// TTL applied when a request carries no timeout (60..=86400)
    pub default_ttl_seconds: u64,
    /// Upper bound for any requested timeout or extension
    pub max_ttl_seconds: u64,
    /// Heartbeat silence after which a lock is reaped (10..=86400)
    pub heartbeat_timeout_seconds: u64,
    /// Interval of the TTL + heartbeat sweep task (1..=3600)
    pub cleanup_interval_seconds: u64,
    /// Optimistic retries for a branch-state write (1..=100)
    pub max_state_retries: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3600,
            max_ttl_seconds: 86_400,
            heartbeat_timeout_seconds: 300,
            cleanup_interval_seconds: 60,
            max_state_retries: 10,
        }
    }
}

impl LockConfig {
    pub fn default_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.default_ttl_seconds as i64)
    }

    pub fn max_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_ttl_seconds as i64)
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_seconds as i64)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        check_range(
            "locks.default_ttl_seconds",
            self.default_ttl_seconds,
            60,
            86_400,
            "Indexing locks normally live minutes to hours",
        )?;
        check_range(
            "locks.max_ttl_seconds",
            self.max_ttl_seconds,
            60,
            7 * 86_400,
            "Keep the hard ceiling at or below one week",
        )?;
        check_range(
            "locks.heartbeat_timeout_seconds",
            self.heartbeat_timeout_seconds,
            10,
            86_400,
            "Use at least three heartbeat intervals of the slowest indexer",
        )?;
        check_range(
            "locks.cleanup_interval_seconds",
            self.cleanup_interval_seconds,
            1,
            3600,
            "Sweeps are cheap; 60s is a good default",
        )?;
        check_range(
            "locks.max_state_retries",
            self.max_state_retries,
            1,
            100,
            "Retries only matter under heavy contention on one branch",
        )?;
        if self.default_ttl_seconds > self.max_ttl_seconds {
            return Err(ConfigError::Conflict {
                issue: format!(
                    "locks.default_ttl_seconds ({}) exceeds locks.max_ttl_seconds ({})",
                    self.default_ttl_seconds, self.max_ttl_seconds
                ),
                fix: "Lower default_ttl_seconds or raise max_ttl_seconds".to_string(),
            });
        }
        Ok(())
    }
}

/// Shadow build, switch and monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShadowConfig {
    /// Root of `<branch>-<hash>/<index_type>/{current,shadow_<id>}` directories
    pub base_path: PathBuf,
    pub switch_strategy: SwitchStrategy,
    /// Bound on the switch critical section (1..=300)
    pub default_switch_timeout_seconds: u64,
    /// Allowed relative size difference against the current index (0.0..=10.0)
    pub size_tolerance: f64,
    /// Shadows reporting fewer bytes fail the always-on size check
    pub min_shadow_size_bytes: u64,
    /// Terminal shadows older than this are garbage-collected (1..=720)
    pub retention_hours: u64,
    /// BUILDING shadows silent for longer than this are cancelled (1..=168)
    pub staleness_hours: u64,
    /// Interval of the monitor task (1..=3600)
    pub monitor_interval_seconds: u64,
    /// Restore the backup automatically when post-switch verification fails
    pub rollback_on_verification_failure: bool,
    /// How many switch results to keep in memory
    pub switch_history_limit: usize,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./data/indexes"),
            switch_strategy: SwitchStrategy::AtomicRename,
            default_switch_timeout_seconds: 10,
            size_tolerance: 0.5,
            min_shadow_size_bytes: 1,
            retention_hours: 24,
            staleness_hours: 6,
            monitor_interval_seconds: 60,
            rollback_on_verification_failure: true,
            switch_history_limit: 100,
        }
    }
}

impl ShadowConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::hours(self.staleness_hours as i64)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_path.as_os_str().is_empty() {
            return Err(ConfigError::Conflict {
                issue: "shadow.base_path is empty".to_string(),
                fix: "Point base_path at a directory on the index volume".to_string(),
            });
        }
        check_range(
            "shadow.default_switch_timeout_seconds",
            self.default_switch_timeout_seconds,
            1,
            300,
            "The switch is a rename or a local copy; keep it short",
        )?;
        check_range(
            "shadow.size_tolerance",
            self.size_tolerance,
            0.0,
            10.0,
            "0.5 flags shadows more than 50% smaller or larger than the current index",
        )?;
        check_range(
            "shadow.retention_hours",
            self.retention_hours,
            1,
            720,
            "Terminal shadows are kept for inspection, then removed",
        )?;
        check_range(
            "shadow.staleness_hours",
            self.staleness_hours,
            1,
            168,
            "Builds silent for longer are assumed crashed",
        )?;
        check_range(
            "shadow.monitor_interval_seconds",
            self.monitor_interval_seconds,
            1,
            3600,
            "60s is a good default",
        )?;
        check_range(
            "shadow.switch_history_limit",
            self.switch_history_limit,
            1,
            10_000,
            "History is in-memory only",
        )?;
        Ok(())
    }
}

/// Auto-merge gating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoMergeConfig {
    pub enabled: bool,
    /// Only merge when the event reports `validation_results.passed = true`
    pub require_validation: bool,
    /// Branches never merged automatically
    pub protected_branches: Vec<String>,
    /// Actor recorded on automatic merges
    pub merge_actor: String,
}

impl Default for AutoMergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_validation: true,
            protected_branches: Vec::new(),
            merge_actor: "auto-merge".to_string(),
        }
    }
}

/// Indexing event handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventConfig {
    /// Issue an atomic switch as soon as a shadow build completes
    pub auto_switch: bool,
    /// Checks run by an automatic switch
    pub auto_switch_checks: Vec<ValidationCheck>,
    /// Keep a backup of the current index on automatic switches
    pub auto_switch_backup: bool,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            auto_switch: true,
            auto_switch_checks: vec![
                ValidationCheck::RecordCountValidation,
                ValidationCheck::SizeComparison,
            ],
            auto_switch_backup: true,
        }
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Schema version (always 1 for v1)
    pub version: u32,
    pub locks: LockConfig,
    pub shadow: ShadowConfig,
    pub auto_merge: AutoMergeConfig,
    pub events: EventConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            version: 1,
            locks: LockConfig::default(),
            shadow: ShadowConfig::default(),
            auto_merge: AutoMergeConfig::default(),
            events: EventConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Load and validate a YAML file.
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(content)?;
        let version = raw
            .get("version")
            .ok_or(ConfigError::MissingVersion)?
            .as_u64()
            .ok_or(ConfigError::MissingVersion)? as u32;

        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: SUPPORTED_VERSIONS.to_vec(),
            });
        }

        let config: CoordinatorConfig = serde_yaml::from_value(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.locks.validate()?;
        self.shadow.validate()?;
        Ok(())
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.shadow.base_path = base_path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_validate() {
        CoordinatorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = CoordinatorConfig::default().with_base_path("/srv/indexes");
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("version: 1"));
        assert!(yaml.contains("ATOMIC_RENAME"));

        let loaded = CoordinatorConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_yaml_loading_partial_sections() {
        let yaml_content = r#"
version: 1
locks:
  heartbeat_timeout_seconds: 120
shadow:
  base_path: /tmp/idx
  switch_strategy: COPY_AND_REPLACE
auto_merge:
  protected_branches: [main, release]
events:
  auto_switch_checks: [INTEGRITY_CHECK]
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = CoordinatorConfig::from_yaml(temp_file.path()).unwrap();
        assert_eq!(config.locks.heartbeat_timeout_seconds, 120);
        assert_eq!(config.locks.default_ttl_seconds, 3600);
        assert_eq!(config.shadow.switch_strategy, SwitchStrategy::CopyAndReplace);
        assert_eq!(config.auto_merge.protected_branches, vec!["main", "release"]);
        assert_eq!(
            config.events.auto_switch_checks,
            vec![ValidationCheck::IntegrityCheck]
        );
    }

    #[test]
    fn test_yaml_missing_version() {
        let result = CoordinatorConfig::from_yaml_str("locks:\n  default_ttl_seconds: 600\n");
        assert!(matches!(result, Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn test_yaml_unsupported_version() {
        let err = CoordinatorConfig::from_yaml_str("version: 2\n").unwrap_err();
        assert!(err.to_string().contains("Supported versions: 1"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = CoordinatorConfig::from_yaml_str("version: 1\nlocks:\n  ttl: 5\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_range_error_has_hint() {
        let mut config = CoordinatorConfig::default();
        config.locks.heartbeat_timeout_seconds = 1;

        let err = config.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("locks.heartbeat_timeout_seconds"));
        assert!(msg.contains("10..=86400"));
    }

    #[test]
    fn test_default_ttl_above_max_conflicts() {
        let mut config = CoordinatorConfig::default();
        config.locks.default_ttl_seconds = 7200;
        config.locks.max_ttl_seconds = 3600;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Conflict { .. })
        ));
    }
}

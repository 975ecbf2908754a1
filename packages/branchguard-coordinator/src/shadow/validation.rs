//! Pre-switch checks on a built shadow index.

use branchguard_storage::ShadowIndexInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::swap::DirStats;

/// Optional checks a switch request can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCheck {
    /// The builder reported at least one record
    RecordCountValidation,
    /// Shadow size stays within the configured tolerance of the current index
    SizeComparison,
    /// Shadow directory can be listed and is not empty
    IntegrityCheck,
}

impl ValidationCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCheck::RecordCountValidation => "RECORD_COUNT_VALIDATION",
            ValidationCheck::SizeComparison => "SIZE_COMPARISON",
            ValidationCheck::IntegrityCheck => "INTEGRITY_CHECK",
        }
    }
}

impl fmt::Display for ValidationCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Thresholds taken from `ShadowConfig`
#[derive(Debug, Clone, Copy)]
pub struct ValidationPolicy {
    pub size_tolerance: f64,
    pub min_shadow_size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run the always-on sanity checks plus the requested `checks`.
///
/// `shadow` and `current` are measured by the swapper before any lock is
/// taken; nothing here touches the filesystem.
pub fn validate_shadow(
    info: &ShadowIndexInfo,
    checks: &[ValidationCheck],
    shadow: &DirStats,
    current: &DirStats,
    policy: ValidationPolicy,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !shadow.exists {
        report.errors.push(format!(
            "shadow index path {} does not exist",
            info.shadow_index_path.display()
        ));
        return report;
    }
    if shadow.size_bytes < policy.min_shadow_size_bytes {
        report.errors.push(format!(
            "shadow index is {} bytes, below the minimum of {}",
            shadow.size_bytes, policy.min_shadow_size_bytes
        ));
    }

    for check in checks {
        match check {
            ValidationCheck::RecordCountValidation => match info.record_count {
                Some(n) if n > 0 => {}
                Some(_) => report
                    .errors
                    .push("shadow index reports 0 records".to_string()),
                None => report
                    .errors
                    .push("shadow index did not report a record count".to_string()),
            },
            ValidationCheck::SizeComparison => {
                if !current.exists || current.size_bytes == 0 {
                    report.warnings.push(format!(
                        "no current index at {} to compare size against",
                        info.current_index_path.display()
                    ));
                    continue;
                }
                let ratio = size_difference_ratio(shadow.size_bytes, current.size_bytes);
                if ratio > policy.size_tolerance {
                    report.errors.push(format!(
                        "shadow size {} differs from current size {} by {:.1}% (tolerance {:.1}%)",
                        shadow.size_bytes,
                        current.size_bytes,
                        ratio * 100.0,
                        policy.size_tolerance * 100.0
                    ));
                }
            }
            ValidationCheck::IntegrityCheck => {
                if shadow.entry_count == 0 {
                    report.errors.push(format!(
                        "shadow index directory {} is empty",
                        info.shadow_index_path.display()
                    ));
                }
            }
        }
    }

    report
}

fn size_difference_ratio(shadow: u64, current: u64) -> f64 {
    (shadow as f64 - current as f64).abs() / current as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchguard_storage::{IndexType, SwitchStrategy};
    use chrono::Utc;
    use std::path::PathBuf;
    use uuid::Uuid;

    const POLICY: ValidationPolicy = ValidationPolicy {
        size_tolerance: 0.5,
        min_shadow_size_bytes: 1,
    };

    fn info(record_count: Option<u64>) -> ShadowIndexInfo {
        let mut info = ShadowIndexInfo::new(
            Uuid::new_v4(),
            "main",
            IndexType::FullText,
            vec!["object_type".to_string()],
            "svc",
            PathBuf::from("/idx/main/full_text/shadow"),
            PathBuf::from("/idx/main/full_text/current"),
            SwitchStrategy::AtomicRename,
            Utc::now(),
        );
        info.record_count = record_count;
        info
    }

    fn dir(size_bytes: u64, entry_count: usize) -> DirStats {
        DirStats {
            exists: true,
            size_bytes,
            entry_count,
        }
    }

    #[test]
    fn test_zero_records_fails() {
        let report = validate_shadow(
            &info(Some(0)),
            &[ValidationCheck::RecordCountValidation],
            &dir(100, 2),
            &DirStats::missing(),
            POLICY,
        );
        assert!(!report.passed());
        assert!(report.errors[0].contains("0 records"));
    }

    #[test]
    fn test_size_comparison_tolerance() {
        let checks = [ValidationCheck::SizeComparison];
        let within = validate_shadow(&info(Some(5)), &checks, &dir(140, 1), &dir(100, 1), POLICY);
        assert!(within.passed());

        let outside = validate_shadow(&info(Some(5)), &checks, &dir(40, 1), &dir(100, 1), POLICY);
        assert!(!outside.passed());
        assert!(outside.errors[0].contains("60.0%"));
    }

    #[test]
    fn test_first_switch_only_warns_on_size() {
        let report = validate_shadow(
            &info(Some(5)),
            &[ValidationCheck::SizeComparison],
            &dir(10, 1),
            &DirStats::missing(),
            POLICY,
        );
        assert!(report.passed());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_missing_shadow_short_circuits() {
        let report = validate_shadow(
            &info(Some(5)),
            &[ValidationCheck::IntegrityCheck, ValidationCheck::RecordCountValidation],
            &DirStats::missing(),
            &DirStats::missing(),
            POLICY,
        );
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("does not exist"));
    }

    #[test]
    fn test_check_names_use_wire_form() {
        let json = serde_json::to_string(&ValidationCheck::RecordCountValidation).unwrap();
        assert_eq!(json, "\"RECORD_COUNT_VALIDATION\"");
    }
}

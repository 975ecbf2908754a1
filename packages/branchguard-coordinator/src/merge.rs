//! Auto-merge decision after indexing completes.

use async_trait::async_trait;
use branchguard_storage::BranchStatus;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::config::AutoMergeConfig;
use crate::events::ValidationResults;

/// Reports whether merging a branch back would conflict
#[async_trait]
pub trait MergeConflictChecker: Send + Sync {
    async fn has_conflicts(&self, branch_name: &str) -> anyhow::Result<bool>;
}

/// Checker that never reports conflicts
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMergeConflicts;

#[async_trait]
impl MergeConflictChecker for NoMergeConflicts {
    async fn has_conflicts(&self, _branch_name: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum MergeDecision {
    Merge,
    Skip(SkipReason),
}

impl MergeDecision {
    pub fn should_merge(&self) -> bool {
        matches!(self, MergeDecision::Merge)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    ProtectedBranch,
    NotReady(BranchStatus),
    ValidationFailed,
    Conflicts,
    ConflictCheckFailed(String),
}

pub struct AutoMergeEvaluator {
    config: AutoMergeConfig,
    checker: Arc<dyn MergeConflictChecker>,
}

impl AutoMergeEvaluator {
    pub fn new(config: AutoMergeConfig, checker: Arc<dyn MergeConflictChecker>) -> Self {
        Self { config, checker }
    }

    pub fn config(&self) -> &AutoMergeConfig {
        &self.config
    }

    /// Cheap checks first; the conflict checker only runs when everything
    /// else allows the merge.
    pub async fn evaluate(
        &self,
        branch_name: &str,
        state: BranchStatus,
        validation: &ValidationResults,
    ) -> MergeDecision {
        if !self.config.enabled {
            return MergeDecision::Skip(SkipReason::Disabled);
        }
        if self.config.protected_branches.iter().any(|b| b == branch_name) {
            return MergeDecision::Skip(SkipReason::ProtectedBranch);
        }
        if state != BranchStatus::Ready {
            return MergeDecision::Skip(SkipReason::NotReady(state));
        }
        if self.config.require_validation && !validation.passed {
            return MergeDecision::Skip(SkipReason::ValidationFailed);
        }

        match self.checker.has_conflicts(branch_name).await {
            Ok(false) => MergeDecision::Merge,
            Ok(true) => MergeDecision::Skip(SkipReason::Conflicts),
            Err(e) => {
                warn!("Merge conflict check for {} failed: {:#}", branch_name, e);
                MergeDecision::Skip(SkipReason::ConflictCheckFailed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysConflicts;

    #[async_trait]
    impl MergeConflictChecker for AlwaysConflicts {
        async fn has_conflicts(&self, _branch_name: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    fn passed() -> ValidationResults {
        ValidationResults {
            passed: true,
            ..ValidationResults::default()
        }
    }

    fn evaluator(config: AutoMergeConfig) -> AutoMergeEvaluator {
        AutoMergeEvaluator::new(config, Arc::new(NoMergeConflicts))
    }

    #[tokio::test]
    async fn test_merges_ready_validated_branch() {
        let decision = evaluator(AutoMergeConfig::default())
            .evaluate("feature-x", BranchStatus::Ready, &passed())
            .await;
        assert!(decision.should_merge());
    }

    #[tokio::test]
    async fn test_skip_reasons() {
        let eval = evaluator(AutoMergeConfig::default());
        assert_eq!(
            eval.evaluate("feature-x", BranchStatus::Ready, &ValidationResults::default())
                .await,
            MergeDecision::Skip(SkipReason::ValidationFailed)
        );
        assert_eq!(
            eval.evaluate("feature-x", BranchStatus::LockedForWrite, &passed())
                .await,
            MergeDecision::Skip(SkipReason::NotReady(BranchStatus::LockedForWrite))
        );

        let protected = evaluator(AutoMergeConfig {
            protected_branches: vec!["main".to_string()],
            ..AutoMergeConfig::default()
        });
        assert_eq!(
            protected.evaluate("main", BranchStatus::Ready, &passed()).await,
            MergeDecision::Skip(SkipReason::ProtectedBranch)
        );
    }

    #[tokio::test]
    async fn test_validation_optional() {
        let eval = evaluator(AutoMergeConfig {
            require_validation: false,
            ..AutoMergeConfig::default()
        });
        assert!(eval
            .evaluate("feature-x", BranchStatus::Ready, &ValidationResults::default())
            .await
            .should_merge());
    }

    #[tokio::test]
    async fn test_injected_checker_blocks_merge() {
        let eval = AutoMergeEvaluator::new(AutoMergeConfig::default(), Arc::new(AlwaysConflicts));
        assert_eq!(
            eval.evaluate("feature-x", BranchStatus::Ready, &passed()).await,
            MergeDecision::Skip(SkipReason::Conflicts)
        );
    }
}

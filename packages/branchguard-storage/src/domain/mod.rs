//! Domain layer for branch coordination
//!
//! # Domain Models
//!
//! - `BranchLock`: one outstanding lock grant, plus the conflict rule
//! - `BranchStateRecord`: write-availability of a branch
//! - `ShadowIndexInfo`: one out-of-band index build
//!
//! # Port Traits
//!
//! - `LockStore`: locks and branch state
//! - `ShadowIndexStore`: shadow builds
//!
//! # Examples
//!
//! ```rust
//! use branchguard_storage::domain::{BranchLock, LockType};
//! use chrono::Utc;
//!
//! let full = BranchLock::branch_scoped("main", LockType::Indexing, "indexer", "full", Utc::now());
//! let part = BranchLock::resource_scoped(
//!     "main",
//!     LockType::Indexing,
//!     "object_type",
//!     "indexer",
//!     "partial",
//!     Utc::now(),
//! );
//! assert!(full.conflicts_with(&part));
//! ```

pub mod branch;
pub mod lock;
pub mod ports;
pub mod shadow;

pub use branch::{BranchStateRecord, BranchStatus};
pub use lock::{BranchLock, LockScope, LockType};
pub use ports::{LockInsertOutcome, LockStore, ShadowIndexStore, ShadowInsertOutcome};
pub use shadow::{IndexType, ShadowIndexInfo, ShadowIndexState, SwitchStrategy};

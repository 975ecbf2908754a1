//! branchguard-storage - branch lock, branch state and shadow index persistence
//!
//! ## Core Principles
//!
//! 1. **Single linearization point**: a lock is granted by one atomic
//!    conflict-checked insert, never by a read followed by a separate write
//! 2. **Never hard-delete locks**: release only deactivates, so history stays queryable
//! 3. **Optimistic branch state**: every write is a compare-and-swap on `version`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use branchguard_storage::{BranchLock, InMemoryStore, LockInsertOutcome, LockStore, LockType};
//!
//! let store = InMemoryStore::new();
//! let lock = BranchLock::branch_scoped("main", LockType::Indexing, "indexer", "full", Utc::now());
//! match store.insert_if_no_conflict(&lock).await? {
//!     LockInsertOutcome::Inserted => { /* granted */ }
//!     LockInsertOutcome::Conflict(holders) => { /* back off */ }
//! }
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    BranchLock, BranchStateRecord, BranchStatus, IndexType, LockInsertOutcome, LockScope,
    LockStore, LockType, ShadowIndexInfo, ShadowIndexState, ShadowIndexStore,
    ShadowInsertOutcome, SwitchStrategy,
};

pub use infrastructure::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteStore;

//! Infrastructure layer - Storage adapters
//!
//! - `InMemoryStore`: DashMap-backed, single process
//! - `SqliteStore`: durable, file-backed

pub mod memory_store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory_store::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

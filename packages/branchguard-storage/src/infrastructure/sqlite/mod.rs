//! SQLite store
//!
//! File-based durable backend. Timestamps are stored as INTEGER unix millis,
//! enums as their SCREAMING_SNAKE_CASE names, sets and free-form config as
//! JSON text. Conflict-checked inserts run inside `BEGIN IMMEDIATE` so they
//! serialize against other processes sharing the database file.
//!
//! Every query runs on the tokio blocking pool; a connection waiting out
//! `busy_timeout` never stalls a runtime worker.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    BranchLock, BranchStateRecord, LockInsertOutcome, LockStore, ShadowIndexInfo,
    ShadowIndexState, ShadowIndexStore, ShadowInsertOutcome,
};
use crate::error::{Result, StorageError};

const LOCK_COLUMNS: &str = "id, branch_name, lock_type, lock_scope, resource_type, resource_id,
     locked_by, reason, acquired_at, expires_at, heartbeat_enabled, last_heartbeat,
     is_active, released_at, released_by";

const BRANCH_COLUMNS: &str = "branch_name, current_state, indexing_started_at,
     indexing_completed_at, indexing_service, error_message, last_merged_at, merged_by,
     updated_at, version";

const SHADOW_COLUMNS: &str = "id, branch_name, index_type, resource_types, state, service_name,
     shadow_index_path, current_index_path, switch_strategy, build_progress_percent,
     record_count, index_size_bytes, started_at, completed_at, switched_at, backup_path,
     error_message, build_config, updated_at";

/// SQLite-backed `LockStore` + `ShadowIndexStore`
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        tracing::debug!(path = %db_path.display(), "opened sqlite store");
        Ok(store)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS branch_locks (
                id TEXT PRIMARY KEY,
                branch_name TEXT NOT NULL,
                lock_type TEXT NOT NULL,
                lock_scope TEXT NOT NULL,
                resource_type TEXT,
                resource_id TEXT,
                locked_by TEXT NOT NULL,
                reason TEXT NOT NULL,
                acquired_at INTEGER NOT NULL,
                expires_at INTEGER,
                heartbeat_enabled BOOLEAN NOT NULL,
                last_heartbeat INTEGER,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                released_at INTEGER,
                released_by TEXT
            )",
            [],
        )?;

        // Conflict lookup
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_locks_conflict
             ON branch_locks(branch_name, lock_scope, resource_type, is_active)",
            [],
        )?;

        // Sweeps
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_locks_expiry
             ON branch_locks(is_active, expires_at)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS branch_state (
                branch_name TEXT PRIMARY KEY,
                current_state TEXT NOT NULL,
                indexing_started_at INTEGER,
                indexing_completed_at INTEGER,
                indexing_service TEXT,
                error_message TEXT,
                last_merged_at INTEGER,
                merged_by TEXT,
                updated_at INTEGER NOT NULL,
                version INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS shadow_index (
                id TEXT PRIMARY KEY,
                branch_name TEXT NOT NULL,
                index_type TEXT NOT NULL,
                resource_types TEXT NOT NULL,
                state TEXT NOT NULL,
                service_name TEXT NOT NULL,
                shadow_index_path TEXT NOT NULL,
                current_index_path TEXT NOT NULL,
                switch_strategy TEXT NOT NULL,
                build_progress_percent REAL NOT NULL DEFAULT 0,
                record_count INTEGER,
                index_size_bytes INTEGER,
                started_at INTEGER NOT NULL,
                completed_at INTEGER,
                switched_at INTEGER,
                backup_path TEXT,
                error_message TEXT,
                build_config TEXT,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_shadow_branch_type
             ON shadow_index(branch_name, index_type)",
            [],
        )?;

        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::database(format!("sqlite worker failed: {}", e)))?
    }

    fn query_locks(
        conn: &Connection,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<BranchLock>> {
        let sql = format!(
            "SELECT {} FROM branch_locks WHERE {} ORDER BY acquired_at",
            LOCK_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let locks = stmt
            .query_map(args, lock_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(locks)
    }

    fn query_lock(conn: &Connection, lock_id: Uuid) -> Result<Option<BranchLock>> {
        let sql = format!("SELECT {} FROM branch_locks WHERE id = ?1", LOCK_COLUMNS);
        let lock = conn
            .query_row(&sql, params![lock_id.to_string()], lock_from_row)
            .optional()?;
        Ok(lock)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════════════════════════════════════

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn opt_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(to_millis)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = StorageError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(from_millis(row.get(idx)?))
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(from_millis))
}

fn opt_u64_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|v| v.max(0) as u64))
}

fn lock_from_row(row: &Row<'_>) -> rusqlite::Result<BranchLock> {
    Ok(BranchLock {
        id: uuid_col(row, 0)?,
        branch_name: row.get(1)?,
        lock_type: parse_col(row, 2)?,
        lock_scope: parse_col(row, 3)?,
        resource_type: row.get(4)?,
        resource_id: row.get(5)?,
        locked_by: row.get(6)?,
        reason: row.get(7)?,
        acquired_at: time_col(row, 8)?,
        expires_at: opt_time_col(row, 9)?,
        heartbeat_enabled: row.get(10)?,
        last_heartbeat: opt_time_col(row, 11)?,
        is_active: row.get(12)?,
        released_at: opt_time_col(row, 13)?,
        released_by: row.get(14)?,
    })
}

fn branch_from_row(row: &Row<'_>) -> rusqlite::Result<BranchStateRecord> {
    Ok(BranchStateRecord {
        branch_name: row.get(0)?,
        current_state: parse_col(row, 1)?,
        indexing_started_at: opt_time_col(row, 2)?,
        indexing_completed_at: opt_time_col(row, 3)?,
        indexing_service: row.get(4)?,
        error_message: row.get(5)?,
        last_merged_at: opt_time_col(row, 6)?,
        merged_by: row.get(7)?,
        updated_at: time_col(row, 8)?,
        version: row.get::<_, i64>(9)?.max(0) as u64,
    })
}

fn shadow_from_row(row: &Row<'_>) -> rusqlite::Result<ShadowIndexInfo> {
    let resource_types: String = row.get(3)?;
    let build_config: Option<String> = row.get(17)?;

    Ok(ShadowIndexInfo {
        id: uuid_col(row, 0)?,
        branch_name: row.get(1)?,
        index_type: parse_col(row, 2)?,
        resource_types: serde_json::from_str(&resource_types)
            .map_err(|e| conversion_error(3, e))?,
        state: parse_col(row, 4)?,
        service_name: row.get(5)?,
        shadow_index_path: PathBuf::from(row.get::<_, String>(6)?),
        current_index_path: PathBuf::from(row.get::<_, String>(7)?),
        switch_strategy: parse_col(row, 8)?,
        build_progress_percent: row.get(9)?,
        record_count: opt_u64_col(row, 10)?,
        index_size_bytes: opt_u64_col(row, 11)?,
        started_at: time_col(row, 12)?,
        completed_at: opt_time_col(row, 13)?,
        switched_at: opt_time_col(row, 14)?,
        backup_path: row.get::<_, Option<String>>(15)?.map(PathBuf::from),
        error_message: row.get(16)?,
        build_config: match build_config {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| conversion_error(17, e))?,
            None => serde_json::Value::Null,
        },
        updated_at: time_col(row, 18)?,
    })
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn opt_i64(v: Option<u64>) -> Option<i64> {
    v.map(|n| n.min(i64::MAX as u64) as i64)
}

// ═══════════════════════════════════════════════════════════════════════════
// LockStore
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
impl LockStore for SqliteStore {
    async fn insert_if_no_conflict(&self, lock: &BranchLock) -> Result<LockInsertOutcome> {
        lock.validate()?;
        let lock = lock.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let conflicts: Vec<BranchLock> = Self::query_locks(
                &tx,
                "branch_name = ?1 AND is_active = 1",
                &[&lock.branch_name],
            )?
            .into_iter()
            .filter(|existing| existing.conflicts_with(&lock))
            .collect();

            if !conflicts.is_empty() {
                tx.rollback()?;
                return Ok(LockInsertOutcome::Conflict(conflicts));
            }

            let sql = format!(
                "INSERT INTO branch_locks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                LOCK_COLUMNS
            );
            tx.execute(
                &sql,
                params![
                    lock.id.to_string(),
                    &lock.branch_name,
                    lock.lock_type.as_str(),
                    lock.lock_scope.as_str(),
                    &lock.resource_type,
                    &lock.resource_id,
                    &lock.locked_by,
                    &lock.reason,
                    to_millis(lock.acquired_at),
                    opt_millis(lock.expires_at),
                    lock.heartbeat_enabled,
                    opt_millis(lock.last_heartbeat),
                    lock.is_active,
                    opt_millis(lock.released_at),
                    &lock.released_by,
                ],
            )?;
            tx.commit()?;

            Ok(LockInsertOutcome::Inserted)
        })
        .await
    }

    async fn get_lock(&self, lock_id: Uuid) -> Result<Option<BranchLock>> {
        self.with_conn(move |conn| Self::query_lock(conn, lock_id)).await
    }

    async fn list_active_locks(&self, branch_name: Option<&str>) -> Result<Vec<BranchLock>> {
        let branch_name = branch_name.map(str::to_string);
        self.with_conn(move |conn| match branch_name {
            Some(branch) => Self::query_locks(conn, "is_active = 1 AND branch_name = ?1", &[&branch]),
            None => Self::query_locks(conn, "is_active = 1", &[]),
        })
        .await
    }

    async fn deactivate_lock(
        &self,
        lock_id: Uuid,
        released_by: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<BranchLock>> {
        let released_by = released_by.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let changed = tx.execute(
                "UPDATE branch_locks SET is_active = 0, released_at = ?2, released_by = ?3
                 WHERE id = ?1 AND is_active = 1",
                params![lock_id.to_string(), to_millis(at), released_by],
            )?;
            let lock = if changed == 1 {
                Self::query_lock(&tx, lock_id)?
            } else {
                None
            };
            tx.commit()?;
            Ok(lock)
        })
        .await
    }

    async fn record_heartbeat(&self, lock_id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE branch_locks SET last_heartbeat = ?2
                 WHERE id = ?1 AND is_active = 1 AND heartbeat_enabled = 1",
                params![lock_id.to_string(), to_millis(at)],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn extend_expiry(
        &self,
        lock_id: Uuid,
        extension: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let current: Option<Option<i64>> = tx
                .query_row(
                    "SELECT expires_at FROM branch_locks WHERE id = ?1 AND is_active = 1",
                    params![lock_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(expires_at) = current else {
                tx.rollback()?;
                return Ok(None);
            };

            let base = expires_at.map(from_millis).map_or(now, |at| at.max(now));
            let deadline = base + extension;
            tx.execute(
                "UPDATE branch_locks SET expires_at = ?2 WHERE id = ?1",
                params![lock_id.to_string(), to_millis(deadline)],
            )?;
            tx.commit()?;

            Ok(Some(deadline))
        })
        .await
    }

    async fn find_expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<BranchLock>> {
        self.with_conn(move |conn| {
            Self::query_locks(
                conn,
                "is_active = 1 AND expires_at IS NOT NULL AND expires_at <= ?1",
                &[&to_millis(now)],
            )
        })
        .await
    }

    async fn find_heartbeat_stale_locks(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<BranchLock>> {
        let cutoff = to_millis(now - timeout);
        self.with_conn(move |conn| {
            Self::query_locks(
                conn,
                "is_active = 1 AND heartbeat_enabled = 1
                 AND COALESCE(last_heartbeat, acquired_at) < ?1",
                &[&cutoff],
            )
        })
        .await
    }

    async fn get_branch_state(&self, branch_name: &str) -> Result<Option<BranchStateRecord>> {
        let branch_name = branch_name.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM branch_state WHERE branch_name = ?1",
                BRANCH_COLUMNS
            );
            let record = conn
                .query_row(&sql, params![branch_name], branch_from_row)
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn list_branch_states(&self) -> Result<Vec<BranchStateRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM branch_state ORDER BY branch_name",
                BRANCH_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map([], branch_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    async fn compare_and_swap_branch_state(
        &self,
        record: &BranchStateRecord,
        expected_version: u64,
    ) -> Result<bool> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let next_version = (expected_version + 1) as i64;

            let changed = if expected_version == 0 {
                let sql = format!(
                    "INSERT OR IGNORE INTO branch_state ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    BRANCH_COLUMNS
                );
                conn.execute(
                    &sql,
                    params![
                        &record.branch_name,
                        record.current_state.as_str(),
                        opt_millis(record.indexing_started_at),
                        opt_millis(record.indexing_completed_at),
                        &record.indexing_service,
                        &record.error_message,
                        opt_millis(record.last_merged_at),
                        &record.merged_by,
                        to_millis(record.updated_at),
                        next_version,
                    ],
                )?
            } else {
                conn.execute(
                    "UPDATE branch_state SET
                        current_state = ?2,
                        indexing_started_at = ?3,
                        indexing_completed_at = ?4,
                        indexing_service = ?5,
                        error_message = ?6,
                        last_merged_at = ?7,
                        merged_by = ?8,
                        updated_at = ?9,
                        version = ?10
                     WHERE branch_name = ?1 AND version = ?11",
                    params![
                        &record.branch_name,
                        record.current_state.as_str(),
                        opt_millis(record.indexing_started_at),
                        opt_millis(record.indexing_completed_at),
                        &record.indexing_service,
                        &record.error_message,
                        opt_millis(record.last_merged_at),
                        &record.merged_by,
                        to_millis(record.updated_at),
                        next_version,
                        expected_version as i64,
                    ],
                )?
            };

            Ok(changed == 1)
        })
        .await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ShadowIndexStore
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
impl ShadowIndexStore for SqliteStore {
    async fn insert_if_no_active_shadow(
        &self,
        info: &ShadowIndexInfo,
    ) -> Result<ShadowInsertOutcome> {
        let resource_types = serde_json::to_string(&info.resource_types)?;
        let build_config = serde_json::to_string(&info.build_config)?;
        let info = info.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let sql = format!(
                "SELECT {} FROM shadow_index
                 WHERE branch_name = ?1 AND index_type = ?2
                   AND state IN ('PREPARING', 'BUILDING', 'BUILT', 'SWITCHING')
                 LIMIT 1",
                SHADOW_COLUMNS
            );
            let existing = tx
                .query_row(
                    &sql,
                    params![&info.branch_name, info.index_type.as_str()],
                    shadow_from_row,
                )
                .optional()?;

            if let Some(existing) = existing {
                tx.rollback()?;
                return Ok(ShadowInsertOutcome::Conflict(Box::new(existing)));
            }

            let sql = format!(
                "INSERT INTO shadow_index ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                SHADOW_COLUMNS
            );
            tx.execute(
                &sql,
                params![
                    info.id.to_string(),
                    &info.branch_name,
                    info.index_type.as_str(),
                    resource_types,
                    info.state.as_str(),
                    &info.service_name,
                    path_text(&info.shadow_index_path),
                    path_text(&info.current_index_path),
                    info.switch_strategy.as_str(),
                    info.build_progress_percent,
                    opt_i64(info.record_count),
                    opt_i64(info.index_size_bytes),
                    to_millis(info.started_at),
                    opt_millis(info.completed_at),
                    opt_millis(info.switched_at),
                    info.backup_path.as_deref().map(path_text),
                    &info.error_message,
                    build_config,
                    to_millis(info.updated_at),
                ],
            )?;
            tx.commit()?;

            Ok(ShadowInsertOutcome::Inserted)
        })
        .await
    }

    async fn get_shadow(&self, shadow_id: Uuid) -> Result<Option<ShadowIndexInfo>> {
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM shadow_index WHERE id = ?1", SHADOW_COLUMNS);
            let info = conn
                .query_row(&sql, params![shadow_id.to_string()], shadow_from_row)
                .optional()?;
            Ok(info)
        })
        .await
    }

    async fn list_shadows(&self, branch_name: Option<&str>) -> Result<Vec<ShadowIndexInfo>> {
        let branch_name = branch_name.map(str::to_string);
        self.with_conn(move |conn| {
            let (filter, args): (&str, Vec<&dyn rusqlite::ToSql>) = match &branch_name {
                Some(branch) => ("WHERE branch_name = ?1", vec![branch as &dyn rusqlite::ToSql]),
                None => ("", Vec::new()),
            };
            let sql = format!(
                "SELECT {} FROM shadow_index {} ORDER BY started_at",
                SHADOW_COLUMNS, filter
            );
            let mut stmt = conn.prepare(&sql)?;
            let shadows = stmt
                .query_map(args.as_slice(), shadow_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(shadows)
        })
        .await
    }

    async fn compare_and_swap_shadow(
        &self,
        info: &ShadowIndexInfo,
        expected_state: ShadowIndexState,
    ) -> Result<bool> {
        let resource_types = serde_json::to_string(&info.resource_types)?;
        let build_config = serde_json::to_string(&info.build_config)?;
        let info = info.clone();

        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE shadow_index SET
                    resource_types = ?2,
                    state = ?3,
                    service_name = ?4,
                    shadow_index_path = ?5,
                    current_index_path = ?6,
                    switch_strategy = ?7,
                    build_progress_percent = ?8,
                    record_count = ?9,
                    index_size_bytes = ?10,
                    completed_at = ?11,
                    switched_at = ?12,
                    backup_path = ?13,
                    error_message = ?14,
                    build_config = ?15,
                    updated_at = ?16
                 WHERE id = ?1 AND state = ?17",
                params![
                    info.id.to_string(),
                    resource_types,
                    info.state.as_str(),
                    &info.service_name,
                    path_text(&info.shadow_index_path),
                    path_text(&info.current_index_path),
                    info.switch_strategy.as_str(),
                    info.build_progress_percent,
                    opt_i64(info.record_count),
                    opt_i64(info.index_size_bytes),
                    opt_millis(info.completed_at),
                    opt_millis(info.switched_at),
                    info.backup_path.as_deref().map(path_text),
                    &info.error_message,
                    build_config,
                    to_millis(info.updated_at),
                    expected_state.as_str(),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn delete_shadow(&self, shadow_id: Uuid) -> Result<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM shadow_index WHERE id = ?1",
                params![shadow_id.to_string()],
            )?;
            Ok(changed == 1)
        })
        .await
    }
}

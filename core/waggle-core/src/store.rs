//! SQLite persistence for agent status records.
//!
//! The store is shared by the daemon and by one short-lived hook process per
//! state transition, so every operation opens its own connection, runs one
//! short transaction and drops the connection. SQLite's file locking is the
//! only synchronization between those processes.
//!
//! The table and column names (`state`, `repo`) are part of the contract with
//! external writers and must not change.

use fs_err as fs;
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};

use crate::error::{Result, WaggleError};

pub const SCHEMA_DDL: &str = "CREATE TABLE IF NOT EXISTS state (
    key TEXT PRIMARY KEY,
    repo TEXT NOT NULL,
    status TEXT NOT NULL,
    updated_at TIMESTAMP
);";

const BUSY_TIMEOUT_MS: i64 = 5000;
// SQLITE_MAX_VARIABLE_NUMBER for SQLite >= 3.32.
const MAX_BOUND_PARAMS: usize = 32766;

/// A status row as written by the hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub key: String,
    pub namespace: String,
    pub status: String,
}

impl StatusRecord {
    pub fn new(
        key: impl Into<String>,
        namespace: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            namespace: namespace.into(),
            status: status.into(),
        }
    }
}

/// A status row as read back from the table.
///
/// `namespace` is optional on read because databases created by older
/// writers did not enforce `NOT NULL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub key: String,
    pub namespace: Option<String>,
    pub status: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Opens the store at `path`, creating the parent directory and the
    /// `state` table if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::attach(path);
        store.init_schema()?;
        Ok(store)
    }

    /// Returns a handle without touching the filesystem.
    pub fn attach(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Idempotent: never alters or drops existing rows.
    pub fn init_schema(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| WaggleError::io("Failed to create database directory", err))?;
        }

        self.write("initialize schema", |tx| {
            tx.execute_batch(SCHEMA_DDL)?;
            Ok(())
        })
    }

    /// Insert-or-replace by key.
    pub fn upsert(&self, record: &StatusRecord) -> Result<()> {
        self.write("upsert status", |tx| {
            tx.execute(
                "INSERT OR REPLACE INTO state (key, repo, status, updated_at) \
                 VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP)",
                params![record.key, record.namespace, record.status],
            )?;
            Ok(())
        })
    }

    /// Full scan in table order.
    pub fn select_all(&self) -> Result<Vec<StatusRow>> {
        self.read("select status rows", |tx| {
            let mut stmt = tx.prepare("SELECT key, repo, status, updated_at FROM state")?;
            let rows = stmt.query_map([], |row| {
                Ok(StatusRow {
                    key: row.get(0)?,
                    namespace: row.get(1)?,
                    status: row.get(2)?,
                    updated_at: timestamp_text(row.get_ref(3)?),
                })
            })?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
    }

    /// Deletes every row whose key is in `keys` with a single `IN (...)`
    /// statement. Returns the number of rows removed.
    pub fn delete_by_keys<I, S>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        if keys.is_empty() {
            return Ok(0);
        }

        self.write("delete status rows by key", |tx| {
            let mut deleted = 0;
            // Only splits when the set exceeds SQLite's bound parameter limit.
            for chunk in keys.chunks(MAX_BOUND_PARAMS) {
                let placeholders: Vec<String> =
                    (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
                let sql = format!(
                    "DELETE FROM state WHERE key IN ({})",
                    placeholders.join(", ")
                );
                deleted += tx.execute(&sql, params_from_iter(chunk.iter()))?;
            }
            Ok(deleted)
        })
    }

    /// Deletes rows whose namespace is `namespace` or lies beneath it.
    ///
    /// Matching is exact and case-sensitive: `/a/b` covers `/a/b` and
    /// `/a/b/c`, never `/a/b2`. The root `/` only covers itself, since its
    /// subtree prefix is `//`. `LIKE` is avoided because it is
    /// ASCII-case-insensitive and treats `_` and `%` as wildcards.
    pub fn delete_by_namespace(&self, namespace: &str) -> Result<usize> {
        let subtree_prefix = format!("{}/", namespace);

        self.write("delete status rows by namespace", |tx| {
            let deleted = tx.execute(
                "DELETE FROM state \
                 WHERE repo = ?1 OR substr(repo, 1, length(?2)) = ?2",
                params![namespace, subtree_prefix],
            )?;
            Ok(deleted)
        })
    }

    pub fn count(&self) -> Result<usize> {
        self.read("count status rows", |tx| {
            let count: i64 = tx.query_row("SELECT COUNT(*) FROM state", [], |row| row.get(0))?;
            Ok(count.max(0) as usize)
        })
    }

    fn read<T>(
        &self,
        context: &str,
        op: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        self.with_transaction(TransactionBehavior::Deferred, context, op)
    }

    fn write<T>(
        &self,
        context: &str,
        op: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        self.with_transaction(TransactionBehavior::Immediate, context, op)
    }

    /// Runs `op` in one transaction. Any error before commit drops the
    /// transaction, which rolls it back; the connection is closed on return.
    fn with_transaction<T>(
        &self,
        behavior: TransactionBehavior,
        context: &str,
        op: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(|err| WaggleError::store(format!("{}: begin", context), err))?;
        let value = op(&tx).map_err(|err| WaggleError::store(context, err))?;
        tx.commit()
            .map_err(|err| WaggleError::store(format!("{}: commit", context), err))?;
        Ok(value)
    }

    fn connect(&self) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags).map_err(|source| {
            WaggleError::StoreOpen {
                path: self.path.clone(),
                source,
            }
        })?;

        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
            .map_err(|err| WaggleError::store("Failed to set busy_timeout", err))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| WaggleError::store("Failed to enable WAL", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| WaggleError::store("Failed to set synchronous", err))?;

        Ok(conn)
    }
}

/// `updated_at` is written as `CURRENT_TIMESTAMP` text by us, but external
/// writers may store epoch integers.
fn timestamp_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(text) => Some(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Integer(value) => Some(value.to_string()),
        ValueRef::Real(value) => Some(value.to_string()),
        ValueRef::Null | ValueRef::Blob(_) => None,
    }
}

//! SQLite persistence for the agent.
//!
//! This is the single source of truth shared by every task in the process:
//! watchers, the keystroke path, the session ticker and the delivery worker
//! each open their own connection per operation. Read-modify-write updates run
//! inside `BEGIN IMMEDIATE` transactions so concurrent callers serialize on the
//! database write lock instead of racing.
//!
//! Tables mirror the agent's buckets: `settings`, `directories`, `heaps`,
//! `meta` (single row) and `queue`. Heap and meta rows are owned by
//! [`crate::heaps`] and [`crate::session`]; queue rows by [`crate::queue`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{AgentError, Result};

pub const SETTING_AUTH_TOKEN: &str = "authorization_token";
pub const SETTING_DISPLAY_NAME: &str = "user_signature_name";

const BUSY_TIMEOUT_MS: i64 = 5000;

pub struct Store {
    path: PathBuf,
}

/// A directory the user asked the agent to watch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchRoot {
    pub id: i64,
    pub path: PathBuf,
    pub added_at: String,
}

impl Store {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ─────────────────────────────────────────────────────────────────────
    // Settings
    // ─────────────────────────────────────────────────────────────────────

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(AgentError::storage(format!("Failed to read setting {}", key)))
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(AgentError::storage(format!("Failed to write setting {}", key)))?;
            Ok(())
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Watch roots
    // ─────────────────────────────────────────────────────────────────────

    /// Returns `true` when the directory was not stored before.
    pub fn add_directory(&self, path: &Path) -> Result<bool> {
        let path = path.to_string_lossy().to_string();
        self.with_connection(|conn| {
            let inserted = conn
                .execute(
                    "INSERT INTO directories (path, added_at) VALUES (?1, ?2) \
                     ON CONFLICT(path) DO NOTHING",
                    params![path, Utc::now().to_rfc3339()],
                )
                .map_err(AgentError::storage("Failed to add directory"))?;
            Ok(inserted > 0)
        })
    }

    /// Returns `true` when a stored directory was removed.
    pub fn remove_directory(&self, path: &Path) -> Result<bool> {
        let path = path.to_string_lossy().to_string();
        self.with_connection(|conn| {
            let removed = conn
                .execute("DELETE FROM directories WHERE path = ?1", params![path])
                .map_err(AgentError::storage("Failed to remove directory"))?;
            Ok(removed > 0)
        })
    }

    pub fn directories(&self) -> Result<Vec<WatchRoot>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, path, added_at FROM directories ORDER BY id ASC")
                .map_err(AgentError::storage("Failed to prepare directories query"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(WatchRoot {
                        id: row.get(0)?,
                        path: PathBuf::from(row.get::<_, String>(1)?),
                        added_at: row.get(2)?,
                    })
                })
                .map_err(AgentError::storage("Failed to query directories"))?;

            let mut roots = Vec::new();
            for row in rows {
                roots.push(row.map_err(AgentError::storage("Failed to decode directory row"))?);
            }
            Ok(roots)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connection plumbing
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.connect()?;
        op(&mut conn)
    }

    /// Runs `op` inside an immediate transaction; any error rolls everything back.
    pub(crate) fn with_transaction<T>(
        &self,
        context: &str,
        op: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(AgentError::storage(format!("Failed to begin {}", context)))?;
            let value = op(&tx)?;
            tx.commit()
                .map_err(AgentError::storage(format!("Failed to commit {}", context)))?;
            Ok(value)
        })
    }

    fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS directories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    path TEXT NOT NULL UNIQUE,
                    added_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS heaps (
                    project_id TEXT PRIMARY KEY,
                    project TEXT NOT NULL,
                    git TEXT NOT NULL,
                    branch TEXT NOT NULL,
                    languages TEXT NOT NULL DEFAULT '[]',
                    files TEXT NOT NULL DEFAULT '[]'
                 );
                 CREATE TABLE IF NOT EXISTS meta (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    session_id TEXT NOT NULL,
                    keypress_count INTEGER NOT NULL DEFAULT 0,
                    editors TEXT NOT NULL DEFAULT '[]',
                    first_activity TEXT,
                    last_activity TEXT,
                    heap_added_to_queue INTEGER NOT NULL DEFAULT 0
                 );
                 CREATE TABLE IF NOT EXISTS queue (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    payload BLOB NOT NULL,
                    enqueued_at TEXT NOT NULL
                 );
                 COMMIT;",
            )
            .map_err(AgentError::storage("Failed to initialize schema"))
        })
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|source| AgentError::Io {
                context: "Failed to create agent data dir".to_string(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(AgentError::storage("Failed to open sqlite db"))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(AgentError::storage("Failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(AgentError::storage("Failed to set synchronous"))?;
        conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS)
            .map_err(AgentError::storage("Failed to set busy_timeout"))?;

        Ok(conn)
    }
}

pub(crate) fn decode_list(raw: &str, context: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).map_err(AgentError::json(context.to_string()))
}

pub(crate) fn encode_list(values: &[String], context: &str) -> Result<String> {
    serde_json::to_string(values).map_err(AgentError::json(context.to_string()))
}

/// Appends `value` unless already present. Returns whether the list changed.
pub(crate) fn push_distinct(values: &mut Vec<String>, value: &str) -> bool {
    if values.iter().any(|existing| existing == value) {
        return false;
    }
    values.push(value.to_string());
    true
}

pub(crate) fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

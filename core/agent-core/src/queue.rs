//! Durable FIFO of serialized records awaiting delivery.
//!
//! Sequence ids come from SQLite `AUTOINCREMENT`, so they keep increasing even
//! after the newest entry is deleted. Entries are removed only after the
//! handler reports [`DeliveryOutcome::Delivered`]; a crash between send and
//! delete re-delivers the entry on the next pass (at-least-once).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::error::{AgentError, Result};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub seq: i64,
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub size: usize,
    pub enqueued_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub delivered: usize,
    /// Sequence of the entry that asked for a retry, if any.
    pub stopped_at: Option<i64>,
    pub remaining: usize,
}

#[derive(Clone)]
pub struct Queue {
    store: Arc<Store>,
    drain_lock: Arc<Mutex<()>>,
}

impl Queue {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            drain_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn enqueue(&self, payload: &[u8]) -> Result<i64> {
        self.store
            .with_transaction("queue enqueue", |conn| enqueue_in(conn, payload))
    }

    pub fn entries(&self) -> Result<Vec<QueueEntry>> {
        self.store.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT seq, payload, enqueued_at FROM queue ORDER BY seq ASC")
                .map_err(AgentError::storage("Failed to prepare queue query"))?;
            let rows = stmt
                .query_map([], entry_from_row)
                .map_err(AgentError::storage("Failed to query queue"))?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row.map_err(AgentError::storage("Failed to decode queue row"))?);
            }
            Ok(entries)
        })
    }

    pub fn len(&self) -> Result<usize> {
        self.store.with_connection(|conn| count(conn))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Visits entries in ascending sequence order, deleting each one the
    /// handler delivers and stopping at the first retry.
    ///
    /// Passes never overlap; a second caller waits for the first to finish.
    /// The handler runs outside any database transaction so a slow network
    /// send does not hold the write lock.
    pub fn drain_in_order<F>(&self, mut handler: F) -> Result<DrainSummary>
    where
        F: FnMut(&QueueEntry) -> DeliveryOutcome,
    {
        let _guard = self
            .drain_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut summary = DrainSummary::default();
        let mut last_seq = 0_i64;

        while let Some(entry) = self.next_after(last_seq)? {
            match handler(&entry) {
                DeliveryOutcome::Delivered => {
                    self.delete(entry.seq)?;
                    summary.delivered += 1;
                    last_seq = entry.seq;
                }
                DeliveryOutcome::Retry => {
                    summary.stopped_at = Some(entry.seq);
                    break;
                }
            }
        }

        summary.remaining = self.len()?;
        Ok(summary)
    }

    fn next_after(&self, seq: i64) -> Result<Option<QueueEntry>> {
        self.store.with_connection(|conn| {
            conn.query_row(
                "SELECT seq, payload, enqueued_at FROM queue
                 WHERE seq > ?1 ORDER BY seq ASC LIMIT 1",
                params![seq],
                entry_from_row,
            )
            .optional()
            .map_err(AgentError::storage("Failed to read next queue entry"))
        })
    }

    fn delete(&self, seq: i64) -> Result<()> {
        self.store.with_connection(|conn| {
            conn.execute("DELETE FROM queue WHERE seq = ?1", params![seq])
                .map_err(AgentError::storage("Failed to delete queue entry"))?;
            Ok(())
        })
    }
}

pub(crate) fn enqueue_in(conn: &Connection, payload: &[u8]) -> Result<i64> {
    conn.execute(
        "INSERT INTO queue (payload, enqueued_at) VALUES (?1, ?2)",
        params![payload, Utc::now().to_rfc3339()],
    )
    .map_err(AgentError::storage("Failed to enqueue record"))?;
    Ok(conn.last_insert_rowid())
}

fn count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))
        .map_err(AgentError::storage("Failed to count queue"))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
    let payload: Vec<u8> = row.get(1)?;
    Ok(QueueEntry {
        seq: row.get(0)?,
        size: payload.len(),
        payload,
        enqueued_at: row.get(2)?,
    })
}

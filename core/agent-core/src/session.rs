//! Session tracking: keystroke accounting and idle-driven flushes.
//!
//! The tracker owns the single `meta` row. Every tick re-reads it from the
//! store and decides, from the stored timestamps alone, whether activity has
//! been quiet long enough to flush heaps into the queue or to start a new
//! session. Each tick is one `BEGIN IMMEDIATE` transaction, so a failure part
//! way through leaves meta, heaps and queue exactly as they were.

use chrono::{DateTime, Utc};
use pacerank_protocol::{Activity, Category, Label, Record};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;
use ulid::Ulid;

use crate::config::SessionConfig;
use crate::editors::editor_for_process;
use crate::error::{AgentError, Result};
use crate::heaps::{self, Heap};
use crate::queue;
use crate::store::{decode_list, encode_list, parse_rfc3339, push_distinct, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Meta {
    pub session_id: String,
    pub keypress_count: u64,
    pub editors: Vec<String>,
    pub first_activity: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    /// Set once the current idle stretch has been flushed; cleared by the next keystroke.
    pub heap_added_to_queue: bool,
}

impl Meta {
    fn fresh() -> Self {
        Self {
            session_id: Ulid::new().to_string(),
            keypress_count: 0,
            editors: Vec::new(),
            first_activity: None,
            last_activity: None,
            heap_added_to_queue: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickOutcome {
    pub flushed_records: usize,
    pub flushed: bool,
    pub session_reset: bool,
}

#[derive(Clone)]
pub struct SessionTracker {
    store: Arc<Store>,
    flush_window: chrono::Duration,
    session_window: chrono::Duration,
}

impl SessionTracker {
    pub fn new(store: Arc<Store>, config: &SessionConfig) -> Self {
        Self {
            store,
            flush_window: config.flush_window(),
            session_window: config.session_window(),
        }
    }

    /// Returns the stored meta, creating a fresh one only when none exists.
    ///
    /// Resuming keeps heaps left behind by a crash eligible for the next flush.
    pub fn resume_or_start(&self) -> Result<Meta> {
        self.store.with_transaction("session resume", load_or_create)
    }

    /// Reads the stored meta without taking a write lock; only a missing
    /// row falls through to [`Self::resume_or_start`].
    pub fn meta(&self) -> Result<Meta> {
        match self.store.with_connection(|conn| load(conn))? {
            Some(meta) => Ok(meta),
            None => self.resume_or_start(),
        }
    }

    /// Counts a keystroke if `process` is a recognized editor.
    ///
    /// Returns the editor's display name, or `None` when the keystroke was
    /// ignored. Ignored keystrokes do not touch the store.
    pub fn record_keystroke(
        &self,
        process: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<&'static str>> {
        let editor = match editor_for_process(process) {
            Some(editor) => editor,
            None => return Ok(None),
        };

        self.store.with_transaction("keystroke", |conn| {
            let mut meta = load_or_create(conn)?;
            meta.keypress_count = meta.keypress_count.saturating_add(1);
            push_distinct(&mut meta.editors, editor);
            if meta.first_activity.is_none() {
                meta.first_activity = Some(at);
            }
            meta.last_activity = Some(match meta.last_activity {
                Some(last) if last > at => last,
                _ => at,
            });
            meta.heap_added_to_queue = false;
            save(conn, &meta)
        })?;

        Ok(Some(editor))
    }

    /// Evaluates the idle windows against `now`.
    ///
    /// Flush runs before the session check, so a stretch that is idle past
    /// both windows still has its heaps flushed under the old session id.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        self.store.with_transaction("session tick", |conn| {
            let mut meta = load_or_create(conn)?;
            let mut outcome = TickOutcome::default();

            let last_activity = match meta.last_activity {
                Some(last) => last,
                None => return Ok(outcome),
            };
            let idle = now - last_activity;

            if idle > self.flush_window && !meta.heap_added_to_queue {
                let start = meta.first_activity.unwrap_or(last_activity);
                for heap in heaps::drain_in(conn)? {
                    if heap.is_empty() {
                        continue;
                    }
                    let record = build_record(&meta, &heap, start, last_activity);
                    let payload = serde_json::to_vec(&record)
                        .map_err(AgentError::json("Failed to serialize record"))?;
                    queue::enqueue_in(conn, &payload)?;
                    outcome.flushed_records += 1;
                }
                meta.heap_added_to_queue = true;
                // An empty flush keeps the start so earlier typing still counts.
                if outcome.flushed_records > 0 {
                    meta.first_activity = None;
                }
                outcome.flushed = true;
            }

            if idle > self.session_window {
                heaps::clear_in(conn)?;
                meta = Meta::fresh();
                outcome.session_reset = true;
            }

            if outcome.flushed || outcome.session_reset {
                save(conn, &meta)?;
            }
            Ok(outcome)
        })
    }
}

/// Labels are ordered: project, branch, git, keycount, files, languages, editors.
pub fn build_record(
    meta: &Meta,
    heap: &Heap,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
) -> Record {
    let mut labels = vec![
        Label::new(Category::Project, heap.project.clone()),
        Label::new(Category::Branch, heap.branch.clone()),
        Label::new(Category::Git, heap.git.clone()),
        Label::new(Category::Keycount, meta.keypress_count.to_string()),
    ];
    labels.extend(
        heap.files
            .iter()
            .map(|file| Label::new(Category::Filename, file.clone())),
    );
    labels.extend(
        heap.languages
            .iter()
            .map(|language| Label::new(Category::Language, language.clone())),
    );
    labels.extend(
        meta.editors
            .iter()
            .map(|editor| Label::new(Category::Editor, editor.clone())),
    );

    Record {
        start,
        stop,
        activity: Activity::Coding,
        session_id: meta.session_id.clone(),
        labels,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Meta row
// ─────────────────────────────────────────────────────────────────────────────

fn load_or_create(conn: &Connection) -> Result<Meta> {
    if let Some(meta) = load(conn)? {
        return Ok(meta);
    }
    let meta = Meta::fresh();
    save(conn, &meta)?;
    tracing::info!(session_id = %meta.session_id, "Started new session");
    Ok(meta)
}

fn load(conn: &Connection) -> Result<Option<Meta>> {
    let row = conn
        .query_row(
            "SELECT session_id, keypress_count, editors, first_activity, last_activity,
                    heap_added_to_queue
             FROM meta WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, bool>(5)?,
                ))
            },
        )
        .optional()
        .map_err(AgentError::storage("Failed to load meta"))?;

    let (session_id, keypress_count, editors, first, last, flushed) = match row {
        Some(row) => row,
        None => return Ok(None),
    };

    Ok(Some(Meta {
        session_id,
        keypress_count: u64::try_from(keypress_count).unwrap_or(0),
        editors: decode_list(&editors, "meta editors")?,
        first_activity: parse_timestamp(first, "first_activity")?,
        last_activity: parse_timestamp(last, "last_activity")?,
        heap_added_to_queue: flushed,
    }))
}

fn save(conn: &Connection, meta: &Meta) -> Result<()> {
    conn.execute(
        "INSERT INTO meta (id, session_id, keypress_count, editors, first_activity,
                           last_activity, heap_added_to_queue)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            session_id = excluded.session_id,
            keypress_count = excluded.keypress_count,
            editors = excluded.editors,
            first_activity = excluded.first_activity,
            last_activity = excluded.last_activity,
            heap_added_to_queue = excluded.heap_added_to_queue",
        params![
            meta.session_id,
            i64::try_from(meta.keypress_count).unwrap_or(i64::MAX),
            encode_list(&meta.editors, "meta editors")?,
            meta.first_activity.map(|at| at.to_rfc3339()),
            meta.last_activity.map(|at| at.to_rfc3339()),
            meta.heap_added_to_queue,
        ],
    )
    .map_err(AgentError::storage("Failed to save meta"))?;
    Ok(())
}

fn parse_timestamp(value: Option<String>, field: &str) -> Result<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(raw) => parse_rfc3339(&raw).map(Some).ok_or_else(|| AgentError::Corrupt {
            context: format!("meta {} is not RFC3339: {}", field, raw),
        }),
    }
}

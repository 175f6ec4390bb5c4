//! Per-project aggregation of touched files and languages.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::project::ProjectInfo;
use crate::store::{decode_list, encode_list, push_distinct, Store};

/// Everything touched in one project since the last flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Heap {
    pub project_id: String,
    pub project: String,
    pub git: String,
    pub branch: String,
    pub languages: Vec<String>,
    pub files: Vec<String>,
}

impl Heap {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.languages.is_empty()
    }
}

#[derive(Clone)]
pub struct Heaps {
    store: Arc<Store>,
}

impl Heaps {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Adds `file_name` and `language` to the project's heap, creating it if
    /// needed. Repeats are no-ops apart from refreshing project/git/branch.
    pub fn record(&self, info: &ProjectInfo, file_name: &str, language: &str) -> Result<()> {
        self.store
            .with_transaction("heap record", |conn| record_in(conn, info, file_name, language))
    }

    /// Returns every heap and removes them in the same transaction.
    pub fn drain(&self) -> Result<Vec<Heap>> {
        self.store.with_transaction("heap drain", drain_in)
    }

    pub fn list(&self) -> Result<Vec<Heap>> {
        self.store.with_connection(|conn| load_all(conn))
    }
}

pub(crate) fn record_in(
    conn: &Connection,
    info: &ProjectInfo,
    file_name: &str,
    language: &str,
) -> Result<()> {
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT languages, files FROM heaps WHERE project_id = ?1",
            params![info.project_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(AgentError::storage("Failed to load heap"))?;

    let (mut languages, mut files) = match existing {
        Some((languages, files)) => (
            decode_list(&languages, "heap languages")?,
            decode_list(&files, "heap files")?,
        ),
        None => (Vec::new(), Vec::new()),
    };

    if !language.is_empty() {
        push_distinct(&mut languages, language);
    }
    if !file_name.is_empty() {
        push_distinct(&mut files, file_name);
    }

    conn.execute(
        "INSERT INTO heaps (project_id, project, git, branch, languages, files)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(project_id) DO UPDATE SET
            project = excluded.project,
            git = excluded.git,
            branch = excluded.branch,
            languages = excluded.languages,
            files = excluded.files",
        params![
            info.project_id,
            info.project_name,
            info.git_remote,
            info.git_branch,
            encode_list(&languages, "heap languages")?,
            encode_list(&files, "heap files")?,
        ],
    )
    .map_err(AgentError::storage("Failed to upsert heap"))?;

    Ok(())
}

pub(crate) fn drain_in(conn: &Connection) -> Result<Vec<Heap>> {
    let heaps = load_all(conn)?;
    clear_in(conn)?;
    Ok(heaps)
}

pub(crate) fn clear_in(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM heaps", [])
        .map_err(AgentError::storage("Failed to clear heaps"))
}

fn load_all(conn: &Connection) -> Result<Vec<Heap>> {
    let mut stmt = conn
        .prepare(
            "SELECT project_id, project, git, branch, languages, files
             FROM heaps ORDER BY rowid ASC",
        )
        .map_err(AgentError::storage("Failed to prepare heaps query"))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .map_err(AgentError::storage("Failed to query heaps"))?;

    let mut heaps = Vec::new();
    for row in rows {
        let (project_id, project, git, branch, languages, files) =
            row.map_err(AgentError::storage("Failed to decode heap row"))?;
        heaps.push(Heap {
            project_id,
            project,
            git,
            branch,
            languages: decode_list(&languages, "heap languages")?,
            files: decode_list(&files, "heap files")?,
        });
    }
    Ok(heaps)
}

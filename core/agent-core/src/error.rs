//! Error types for pacerank-core operations.

use std::path::PathBuf;

/// All errors that can occur in the capture and delivery pipeline.
///
/// Classification rejections are not errors; see [`crate::classify::Classification`].
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Stored value is corrupt: {context}")]
    Corrupt { context: String },

    // ─────────────────────────────────────────────────────────────────────
    // Watch Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("No watch backend accepted {path}: {details}")]
    WatchUnavailable { path: PathBuf, details: String },

    #[error("Watch backend error: {0}")]
    Watch(String),

    // ─────────────────────────────────────────────────────────────────────
    // Delivery Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Transport error: {0}")]
    Transport(String),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl AgentError {
    pub(crate) fn storage(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let context = context.into();
        move |source| AgentError::Storage { context, source }
    }

    pub(crate) fn json(context: impl Into<String>) -> impl FnOnce(serde_json::Error) -> Self {
        let context = context.into();
        move |source| AgentError::Json { context, source }
    }
}

/// Convenience type alias for Results using AgentError.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<AgentError> for String {
    fn from(err: AgentError) -> String {
        err.to_string()
    }
}

//! Wire types for the pacerank agent.
//!
//! Two audiences share this crate:
//! - local clients (OS hook shims, the CLI, a presentation layer) that talk to
//!   the running agent over its Unix socket using [`Request`] / [`Response`];
//! - the remote collector, which receives serialized [`Record`]s and answers
//!   with a [`CollectorReply`].
//!
//! The agent remains the authority on validation, but clients reuse the same
//! types so the schema cannot drift between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
const MAX_PROCESS_NAME_LEN: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Local IPC
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    KeyPress,
    GetMeta,
    GetHeaps,
    GetQueue,
    AddWatchRoot,
    RemoveWatchRoot,
    ListWatchRoots,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// A keystroke observed by the OS hook while some process had focus.
///
/// Hooks that only know the focused pid send `pid`; the agent resolves the
/// executable name itself.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KeyPress {
    #[serde(default)]
    pub process: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub recorded_at: Option<String>,
}

impl KeyPress {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match (&self.process, self.pid) {
            (Some(process), _) => {
                if process.trim().is_empty() {
                    return Err(ErrorInfo::new("missing_field", "process must not be empty"));
                }
                if process.len() > MAX_PROCESS_NAME_LEN {
                    return Err(ErrorInfo::new(
                        "invalid_process",
                        "process must be 256 characters or fewer",
                    ));
                }
            }
            (None, Some(0)) | (None, None) => {
                return Err(ErrorInfo::new(
                    "missing_field",
                    "process or pid is required",
                ));
            }
            (None, Some(_)) => {}
        }

        if let Some(recorded_at) = &self.recorded_at {
            if DateTime::parse_from_rfc3339(recorded_at).is_err() {
                return Err(ErrorInfo::new(
                    "invalid_timestamp",
                    "recorded_at must be RFC3339",
                ));
            }
        }

        Ok(())
    }
}

pub fn parse_key_press(params: Value) -> Result<KeyPress, ErrorInfo> {
    let key_press: KeyPress = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("key_press payload is invalid JSON: {}", err),
        )
    })?;
    key_press.validate()?;
    Ok(key_press)
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WatchRootParams {
    pub path: String,
}

pub fn parse_watch_root(params: Value) -> Result<WatchRootParams, ErrorInfo> {
    let parsed: WatchRootParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("watch root payload is invalid JSON: {}", err),
        )
    })?;
    if parsed.path.trim().is_empty() {
        return Err(ErrorInfo::new("missing_field", "path is required"));
    }
    if !Path::new(&parsed.path).is_absolute() {
        return Err(ErrorInfo::new("invalid_path", "path must be absolute"));
    }
    Ok(parsed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Collector records
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Coding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Project,
    Git,
    Filename,
    Branch,
    Language,
    Editor,
    Keycount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub category: Category,
    pub value: String,
}

impl Label {
    pub fn new(category: Category, value: impl Into<String>) -> Self {
        Self {
            category,
            value: value.into(),
        }
    }
}

/// One flushed slice of a session for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub activity: Activity,
    pub session_id: String,
    pub labels: Vec<Label>,
}

impl Record {
    pub fn label_values(&self, category: Category) -> Vec<&str> {
        self.labels
            .iter()
            .filter(|label| label.category == category)
            .map(|label| label.value.as_str())
            .collect()
    }
}

/// Envelope every collector endpoint answers with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorReply {
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub content: Option<Value>,
}

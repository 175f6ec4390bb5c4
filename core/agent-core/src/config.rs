//! Agent configuration and on-disk locations.
//!
//! Everything lives under `~/.pacerank/`:
//! - `agent.toml` optional overrides (missing file means defaults)
//! - `agent.db` the SQLite store
//! - `agent.sock` the local IPC socket
//! - `logs/` daily-rolling log files

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AgentError, Result};

pub const SOCKET_ENV: &str = "PACERANK_SOCKET";
pub const COLLECTOR_URL_ENV: &str = "PACERANK_COLLECTOR_URL";

const AGENT_DIR: &str = ".pacerank";
const CONFIG_FILE: &str = "agent.toml";
const DB_FILE: &str = "agent.db";
const SOCKET_FILE: &str = "agent.sock";
const LOG_DIR: &str = "logs";

const DEFAULT_COLLECTOR_URL: &str = "https://digest.pacerank.io";

#[derive(Debug, Clone)]
pub struct AgentPaths {
    pub root: PathBuf,
}

impl AgentPaths {
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(AgentError::HomeDirNotFound)?;
        Ok(Self::under(&home))
    }

    pub fn under(home: &Path) -> Self {
        Self {
            root: home.join(AGENT_DIR),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn database(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    /// `PACERANK_SOCKET` wins over the default location.
    pub fn socket(&self) -> PathBuf {
        match std::env::var(SOCKET_ENV) {
            Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
            _ => self.root.join(SOCKET_FILE),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join(LOG_DIR)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub collector: CollectorConfig,
    pub session: SessionConfig,
    pub delivery: DeliveryConfig,
    pub watcher: WatcherConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_COLLECTOR_URL.to_string(),
            timeout_secs: 10,
        }
    }
}

impl CollectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Idle thresholds for the session tracker.
///
/// A flush happens once activity has been quiet longer than `flush_window_secs`;
/// a brand-new session starts once it has been quiet longer than
/// `session_window_secs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub flush_window_secs: u64,
    pub session_window_secs: u64,
    pub tick_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flush_window_secs: 180,
            session_window_secs: 1800,
            tick_interval_secs: 5,
        }
    }
}

impl SessionConfig {
    pub fn flush_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.flush_window_secs))
    }

    pub fn session_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(clamp_secs(self.session_window_secs))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub interval_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

impl DeliveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Try the OS event backend before falling back to polling.
    pub native: bool,
    pub poll_interval_secs: u64,
    /// Directory names skipped in addition to the built-in list.
    pub ignore_directories: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            native: true,
            poll_interval_secs: 5,
            ignore_directories: Vec::new(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Largest second count `chrono::Duration::seconds` accepts.
const MAX_WINDOW_SECS: i64 = i64::MAX / 1000;

fn clamp_secs(value: u64) -> i64 {
    i64::try_from(value)
        .unwrap_or(MAX_WINDOW_SECS)
        .min(MAX_WINDOW_SECS)
}

/// Loads `path`, returning defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        return Ok(AgentConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| AgentError::Io {
        context: format!("Failed to read config {}", path.display()),
        source,
    })?;
    let mut config =
        toml::from_str::<AgentConfig>(&content).map_err(|err| AgentError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;
    config.collector.url = config.collector.url.trim_end_matches('/').to_string();
    Ok(config)
}

impl AgentConfig {
    /// Applies environment overrides on top of file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(COLLECTOR_URL_ENV) {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                self.collector.url = url.to_string();
            }
        }
        self
    }
}

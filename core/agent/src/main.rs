//! pacerank: local coding-activity agent.
//!
//! ## Subcommands
//!
//! - `run`: start the agent (watchers, session ticker, delivery, IPC socket)
//! - `key`: report a keystroke to the running agent (called by OS hook shims)
//! - `status`: print agent health, session meta and queue depth
//! - `dirs`: manage watch roots (through the agent when running, else the store)
//! - `login`: store the collector token and display name

mod client;
mod logging;
mod process;
mod runtime;
mod server;
mod transport;

use clap::{Parser, Subcommand};
use fs_err as fs;
use pacerank_core::config::AgentConfig;
use pacerank_core::ignore::reject_watch_root;
use pacerank_core::store::{SETTING_AUTH_TOKEN, SETTING_DISPLAY_NAME};
use pacerank_core::{load_config, AgentPaths, Queue, Store};
use pacerank_protocol::Method;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use runtime::Runtime;
use transport::HttpTransport;

#[derive(Parser)]
#[command(name = "pacerank")]
#[command(about = "Records coding activity and delivers it to the pacerank collector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent in the foreground
    Run {
        /// Extra folder to watch (persisted as a watch root)
        #[arg(long = "folder", value_name = "DIR")]
        folders: Vec<PathBuf>,

        /// Force debug logging
        #[arg(long, short)]
        verbose: bool,
    },

    /// Report one keystroke in the focused process
    Key {
        /// Executable name of the focused process
        #[arg(long, conflicts_with = "pid", required_unless_present = "pid")]
        process: Option<String>,

        /// Pid of the focused process
        #[arg(long)]
        pid: Option<u32>,
    },

    /// Show agent health, session and queue
    Status,

    /// Manage watch roots
    Dirs {
        #[command(subcommand)]
        action: DirsAction,
    },

    /// Store the collector authorization token
    Login {
        #[arg(long)]
        token: String,

        /// Display name attached to this machine
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum DirsAction {
    /// Start watching a folder
    Add {
        #[arg(value_name = "DIR")]
        path: PathBuf,
    },
    /// Stop watching a folder
    Remove {
        #[arg(value_name = "DIR")]
        path: PathBuf,
    },
    /// List watched folders
    List,
}

fn main() {
    let cli = Cli::parse();

    let paths = match AgentPaths::from_home() {
        Ok(paths) => paths,
        Err(err) => {
            eprintln!("pacerank: {}", err);
            std::process::exit(1);
        }
    };

    let _logging_guard = match &cli.command {
        Commands::Run { verbose, .. } => logging::init(Some(&paths.log_dir()), *verbose),
        _ => logging::init(None, false),
    };

    let result = match cli.command {
        Commands::Run { folders, .. } => run(&paths, &folders),
        Commands::Key { process, pid } => key(&paths, process, pid),
        Commands::Status => status(&paths),
        Commands::Dirs { action } => dirs_command(&paths, action),
        Commands::Login { token, name } => login(&paths, &token, name.as_deref()),
    };

    if let Err(err) = result {
        error!(error = %err, "pacerank failed");
        std::process::exit(1);
    }
}

fn load_agent_config(paths: &AgentPaths) -> AgentConfig {
    let config = match load_config(&paths.config_file()) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load agent config; using defaults");
            AgentConfig::default()
        }
    };
    config.with_env_overrides()
}

fn open_store(paths: &AgentPaths) -> Result<Arc<Store>, String> {
    Store::open(paths.database())
        .map(Arc::new)
        .map_err(|err| format!("Failed to open agent database: {}", err))
}

fn run(paths: &AgentPaths, folders: &[PathBuf]) -> Result<(), String> {
    let socket_path = paths.socket();
    if client::agent_running(&socket_path) {
        return Err(format!(
            "an agent is already running on {}",
            socket_path.display()
        ));
    }

    let config = load_agent_config(paths);
    let store = open_store(paths)?;
    let runtime = Arc::new(Runtime::new(Arc::clone(&store), &config)?);

    for folder in folders {
        let folder = absolute(folder)?;
        runtime
            .add_root(&folder)
            .map_err(|err| format!("Cannot watch {}: {}", folder.display(), err))?;
    }
    let watching = runtime.watch_persisted_roots()?;
    if watching == 0 {
        warn!("No watch roots configured; add one with `pacerank dirs add <DIR>`");
    }

    let transport = HttpTransport::new(&config.collector.url, config.collector.timeout(), store)
        .map_err(|err| err.to_string())?;
    info!(
        endpoint = transport.endpoint(),
        user_agent = %transport::user_agent(),
        "Collector transport ready"
    );
    runtime.start_background(&config, Arc::new(transport));

    let listener = server::bind(&socket_path)?;
    server::serve(listener, Arc::clone(&runtime));
    runtime.shutdown();
    Ok(())
}

fn key(paths: &AgentPaths, process: Option<String>, pid: Option<u32>) -> Result<(), String> {
    let params = serde_json::json!({ "process": process, "pid": pid });
    client::call(&paths.socket(), Method::KeyPress, Some(params))?;
    Ok(())
}

fn status(paths: &AgentPaths) -> Result<(), String> {
    let socket = paths.socket();
    if client::agent_running(&socket) {
        let report = serde_json::json!({
            "health": client::call(&socket, Method::GetHealth, None)?,
            "meta": client::call(&socket, Method::GetMeta, None)?,
            "heaps": client::call(&socket, Method::GetHeaps, None)?,
            "queue": client::call(&socket, Method::GetQueue, None)?,
        });
        return print_json(&report);
    }

    let store = open_store(paths)?;
    let queued = Queue::new(Arc::clone(&store))
        .len()
        .map_err(|err| err.to_string())?;
    let roots = store.directories().map_err(|err| err.to_string())?;
    print_json(&serde_json::json!({
        "health": { "status": "not_running" },
        "watch_roots": roots,
        "queue_len": queued,
    }))
}

fn dirs_command(paths: &AgentPaths, action: DirsAction) -> Result<(), String> {
    let socket = paths.socket();
    let online = client::agent_running(&socket);

    match action {
        DirsAction::Add { path } => {
            let path = absolute(&path)?;
            if online {
                let params = serde_json::json!({ "path": path });
                print_json(&client::call(&socket, Method::AddWatchRoot, Some(params))?)
            } else {
                if let Some(reason) = reject_watch_root(&path) {
                    return Err(reason);
                }
                if !path.is_dir() {
                    return Err(format!("'{}' is not a directory", path.display()));
                }
                let added = open_store(paths)?
                    .add_directory(&path)
                    .map_err(|err| err.to_string())?;
                print_json(&serde_json::json!({ "path": path, "added": added }))
            }
        }
        DirsAction::Remove { path } => {
            let path = absolute(&path)?;
            if online {
                let params = serde_json::json!({ "path": path });
                print_json(&client::call(&socket, Method::RemoveWatchRoot, Some(params))?)
            } else {
                let removed = open_store(paths)?
                    .remove_directory(&path)
                    .map_err(|err| err.to_string())?;
                print_json(&serde_json::json!({ "path": path, "removed": removed }))
            }
        }
        DirsAction::List => {
            if online {
                print_json(&client::call(&socket, Method::ListWatchRoots, None)?)
            } else {
                let roots = open_store(paths)?
                    .directories()
                    .map_err(|err| err.to_string())?;
                print_json(&serde_json::to_value(roots).map_err(|err| err.to_string())?)
            }
        }
    }
}

fn login(paths: &AgentPaths, token: &str, name: Option<&str>) -> Result<(), String> {
    let token = token.trim();
    if token.is_empty() {
        return Err("token must not be empty".to_string());
    }
    let store = open_store(paths)?;
    store
        .set_setting(SETTING_AUTH_TOKEN, token)
        .map_err(|err| err.to_string())?;
    if let Some(name) = name.map(str::trim).filter(|name| !name.is_empty()) {
        store
            .set_setting(SETTING_DISPLAY_NAME, name)
            .map_err(|err| err.to_string())?;
    }
    info!("Credentials saved");
    Ok(())
}

/// Resolves `path` against the working directory, following symlinks when it exists.
fn absolute(path: &Path) -> Result<PathBuf, String> {
    if let Ok(resolved) = fs::canonicalize(path) {
        return Ok(resolved);
    }
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| format!("Failed to resolve working directory: {}", err))
}

fn print_json(value: &Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|err| err.to_string())?;
    println!("{}", text);
    Ok(())
}

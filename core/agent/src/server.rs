//! Unix-socket IPC server.
//!
//! One request per connection: a single line of JSON in, a single line of
//! JSON out. The OS hook shim sends `key_press`; the CLI and presentation
//! layer use the read accessors and watch-root management.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::Serialize;
use serde_json::Value;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use pacerank_protocol::{
    parse_key_press, parse_watch_root, ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};

use crate::process::process_name;
use crate::runtime::Runtime;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

pub fn bind(socket_path: &Path) -> Result<UnixListener, String> {
    prepare_socket_dir(socket_path)?;
    remove_existing_socket(socket_path)?;
    UnixListener::bind(socket_path)
        .map_err(|err| format!("Failed to bind {}: {}", socket_path.display(), err))
}

/// Accepts connections until the listener fails; one thread per connection.
pub fn serve(listener: UnixListener, runtime: Arc<Runtime>) {
    if let Ok(addr) = listener.local_addr() {
        if let Some(path) = addr.as_pathname() {
            info!(path = %path.display(), "Pacerank agent listening");
        }
    }
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let runtime = Arc::clone(&runtime);
                thread::spawn(move || handle_connection(stream, runtime));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept agent connection");
            }
        }
    }
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, runtime: Arc<Runtime>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let _ = write_response(&mut stream, Response::error_with_info(None, err));
            return;
        }
    };

    debug!(method = ?request.method, id = ?request.id, "Agent request received");
    let response = handle_request(request, &runtime);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

pub(crate) fn handle_request(request: Request, runtime: &Runtime) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    let pipeline = runtime.pipeline();
    match request.method {
        Method::GetHealth => {
            let queue_len = pipeline.queue().len().ok();
            Response::ok(
                id,
                serde_json::json!({
                    "status": "ok",
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": PROTOCOL_VERSION,
                    "watching": runtime.watched_paths(),
                    "queue_len": queue_len,
                }),
            )
        }
        Method::KeyPress => handle_key_press(id, request.params, runtime),
        Method::GetMeta => respond(id, "meta_error", pipeline.meta()),
        Method::GetHeaps => respond(id, "heaps_error", pipeline.heaps().list()),
        Method::GetQueue => respond(id, "queue_error", pipeline.queue().entries()),
        Method::ListWatchRoots => respond(id, "watch_root_error", runtime.roots()),
        Method::AddWatchRoot => match watch_root_path(request.params) {
            Ok(path) => match runtime.add_root(&path) {
                Ok(added) => Response::ok(
                    id,
                    serde_json::json!({ "path": path, "added": added }),
                ),
                Err(err) => Response::error(id, "watch_root_rejected", err),
            },
            Err(err) => Response::error_with_info(id, err),
        },
        Method::RemoveWatchRoot => match watch_root_path(request.params) {
            Ok(path) => match runtime.remove_root(&path) {
                Ok(removed) => Response::ok(
                    id,
                    serde_json::json!({ "path": path, "removed": removed }),
                ),
                Err(err) => Response::error(id, "watch_root_error", err),
            },
            Err(err) => Response::error_with_info(id, err),
        },
    }
}

fn handle_key_press(id: Option<String>, params: Option<Value>, runtime: &Runtime) -> Response {
    let params = match params {
        Some(params) => params,
        None => {
            return Response::error(id, "invalid_params", "key_press payload is required")
        }
    };
    let key_press = match parse_key_press(params) {
        Ok(key_press) => key_press,
        Err(err) => return Response::error_with_info(id, err),
    };

    let process = match (key_press.process, key_press.pid) {
        (Some(process), _) => process,
        (None, Some(pid)) => match process_name(pid) {
            Some(name) => name,
            None => {
                return Response::error(
                    id,
                    "unknown_process",
                    format!("no running process with pid {}", pid),
                )
            }
        },
        (None, None) => {
            return Response::error(id, "missing_field", "process or pid is required")
        }
    };

    // Validated as RFC3339 by `parse_key_press`.
    let at = key_press
        .recorded_at
        .as_deref()
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    match runtime.pipeline().record_keystroke(&process, at) {
        Ok(editor) => {
            if let Some(editor) = editor {
                debug!(process = %process, editor, "Keystroke counted");
            }
            Response::ok(
                id,
                serde_json::json!({ "accepted": true, "editor": editor }),
            )
        }
        Err(err) => {
            warn!(process = %process, error = %err, "Failed to record keystroke");
            Response::error(id, "keystroke_error", err.to_string())
        }
    }
}

fn watch_root_path(params: Option<Value>) -> Result<PathBuf, ErrorInfo> {
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", "path is required"))?;
    Ok(PathBuf::from(parse_watch_root(params)?.path))
}

fn respond<T: Serialize, E: std::fmt::Display>(
    id: Option<String>,
    code: &str,
    result: Result<T, E>,
) -> Response {
    match result {
        Ok(value) => match serde_json::to_value(value) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize response: {}", err),
            ),
        },
        Err(err) => Response::error(id, code, err.to_string()),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

use pacerank_protocol::{Method, Request, Response, PROTOCOL_VERSION};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct AgentGuard {
    child: Child,
}

impl Drop for AgentGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A localhost URL nothing listens on, so delivery fails fast and records stay queued.
fn unreachable_collector() -> String {
    let port = TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("Failed to reserve a port")
        .port();
    format!("http://127.0.0.1:{}", port)
}

fn spawn_agent(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_pacerank"))
        .arg("run")
        .env("HOME", home)
        .env_remove("PACERANK_SOCKET")
        .env("PACERANK_COLLECTOR_URL", unreachable_collector())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn pacerank")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".pacerank").join("agent.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if UnixStream::connect(path).is_ok() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for agent socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to agent socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn request(method: Method, params: Option<serde_json::Value>) -> Request {
    Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(format!("{:?}", method)),
        params,
    }
}

#[test]
fn agent_ipc_health_keystroke_and_roots_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());
    let child = spawn_agent(home.path());
    let _guard = AgentGuard { child };

    wait_for_socket(&socket, Duration::from_secs(10));

    let health = send_request(&socket, request(Method::GetHealth, None));
    assert!(health.ok, "health response was not ok");
    let status = health
        .data
        .as_ref()
        .and_then(|data| data.get("status"))
        .and_then(|value| value.as_str())
        .unwrap_or("missing");
    assert_eq!(status, "ok");

    let key = send_request(
        &socket,
        request(
            Method::KeyPress,
            Some(serde_json::json!({ "process": "code" })),
        ),
    );
    assert!(key.ok, "key_press failed: {:?}", key.error);

    let meta = send_request(&socket, request(Method::GetMeta, None));
    let data = meta.data.expect("meta data");
    assert_eq!(data["keypress_count"], 1);
    assert_eq!(data["editors"], serde_json::json!(["Visual Studio Code"]));

    let project = home.path().join("projects");
    std::fs::create_dir_all(&project).expect("create projects dir");
    let project = project.canonicalize().expect("canonical projects dir");
    let added = send_request(
        &socket,
        request(
            Method::AddWatchRoot,
            Some(serde_json::json!({ "path": project.to_string_lossy() })),
        ),
    );
    assert!(added.ok, "add_watch_root failed: {:?}", added.error);

    let roots = send_request(&socket, request(Method::ListWatchRoots, None));
    let roots = roots.data.expect("roots data");
    let listed: Vec<&str> = roots
        .as_array()
        .expect("roots array")
        .iter()
        .filter_map(|root| root.get("path").and_then(|path| path.as_str()))
        .collect();
    assert_eq!(listed, vec![project.to_string_lossy().as_ref()]);

    let mismatch = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION + 1,
            method: Method::GetHealth,
            id: None,
            params: None,
        },
    );
    assert!(!mismatch.ok);
    assert_eq!(mismatch.error.expect("error").code, "protocol_mismatch");
}

#[test]
fn malformed_request_gets_error_response() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());
    let child = spawn_agent(home.path());
    let _guard = AgentGuard { child };

    wait_for_socket(&socket, Duration::from_secs(10));

    let mut stream = UnixStream::connect(&socket).expect("Failed to connect to agent socket");
    stream.write_all(b"not json\n").expect("Failed to write request");
    let response = read_response(&mut stream);

    assert!(!response.ok);
    assert_eq!(response.error.expect("error").code, "invalid_json");
}

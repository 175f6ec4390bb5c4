//! End-to-end flows across watcher, resolver, heaps, session, queue and delivery.

use chrono::{Duration, Utc};
use pacerank_protocol::{Category, Record};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, Instant};

use crate::classify::classify;
use crate::config::{SessionConfig, WatcherConfig};
use crate::delivery::{DeliveryWorker, Transport, TransportReply};
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::project::tests::init_fake_repo;
use crate::store::Store;
use crate::watcher::{CodeEvent, CodeWatcher};

const ORIGIN: &str = "git@example.com:team/app.git";

fn session_config() -> SessionConfig {
    SessionConfig {
        flush_window_secs: 20,
        session_window_secs: 1800,
        tick_interval_secs: 5,
    }
}

fn open_pipeline(temp_dir: &tempfile::TempDir) -> Pipeline {
    let store = Store::open(temp_dir.path().join("agent.db")).expect("store init");
    Pipeline::open(Arc::new(store), &session_config()).expect("pipeline")
}

fn code_event(root: &std::path::Path, path: std::path::PathBuf, bytes: &[u8]) -> CodeEvent {
    let language = classify(&path, bytes)
        .language()
        .expect("source file")
        .to_string();
    CodeEvent {
        root: root.to_path_buf(),
        file_name: path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        path,
        language,
    }
}

fn queued_records(pipeline: &Pipeline) -> Vec<Record> {
    pipeline
        .queue()
        .entries()
        .expect("queue entries")
        .iter()
        .map(|entry| serde_json::from_slice(&entry.payload).expect("record json"))
        .collect()
}

#[derive(Default)]
struct RecordingTransport {
    bodies: Mutex<Vec<Vec<u8>>>,
}

impl Transport for RecordingTransport {
    fn send(&self, payload: &[u8]) -> Result<TransportReply> {
        self.bodies.lock().unwrap().push(payload.to_vec());
        Ok(TransportReply {
            status: 200,
            correlation_id: "c-1".to_string(),
            ..TransportReply::default()
        })
    }
}

#[test]
fn edit_idle_tick_produces_one_labeled_record() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let proj = temp_dir.path().join("proj");
    let app = proj.join("app");
    init_fake_repo(&app, "main", &[ORIGIN]);

    let pipeline = open_pipeline(&temp_dir);
    let t0 = Utc::now() - Duration::seconds(120);
    for offset in 0..3 {
        pipeline
            .record_keystroke("code", t0 + Duration::seconds(offset))
            .expect("keystroke");
    }

    let event = code_event(&proj, app.join("main.go"), b"package main\n");
    let info = pipeline.record_code_event(&event).expect("record event");
    assert_eq!(info.project_name, "app");

    let last = t0 + Duration::seconds(2);
    let outcome = pipeline.tick(last + Duration::seconds(40)).expect("tick");
    assert_eq!(outcome.flushed_records, 1);

    let records = queued_records(&pipeline);
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.label_values(Category::Project), vec!["app"]);
    assert_eq!(record.label_values(Category::Branch), vec!["refs/heads/main"]);
    assert_eq!(record.label_values(Category::Git), vec![ORIGIN]);
    assert_eq!(record.label_values(Category::Keycount), vec!["3"]);
    assert_eq!(record.label_values(Category::Filename), vec!["main.go"]);
    assert_eq!(record.label_values(Category::Language), vec!["go"]);
    assert_eq!(record.label_values(Category::Editor), vec!["Visual Studio Code"]);
    assert_eq!(record.start, t0);
    assert_eq!(record.stop, last);

    assert!(pipeline.heaps().list().expect("heaps").is_empty());
    let again = pipeline.tick(last + Duration::seconds(45)).expect("second tick");
    assert_eq!(again.flushed_records, 0);
}

#[test]
fn files_across_projects_flush_separately() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let proj = temp_dir.path().join("proj");
    init_fake_repo(&proj.join("api"), "main", &[ORIGIN]);
    init_fake_repo(&proj.join("web"), "develop", &[]);
    std::fs::create_dir_all(proj.join("scratch")).expect("scratch");

    let pipeline = open_pipeline(&temp_dir);
    let t0 = Utc::now() - Duration::seconds(300);
    pipeline.record_keystroke("idea64.exe", t0).expect("keystroke");

    for (path, bytes) in [
        (proj.join("api/src/server.rs"), &b"fn main() {}\n"[..]),
        (proj.join("api/build.rs"), &b"fn main() {}\n"[..]),
        (proj.join("web/app.ts"), &b"export {}\n"[..]),
        (proj.join("scratch/try.py"), &b"print(1)\n"[..]),
    ] {
        pipeline
            .record_code_event(&code_event(&proj, path, bytes))
            .expect("record event");
    }

    pipeline.tick(Utc::now()).expect("tick");
    let mut records = queued_records(&pipeline);
    records.sort_by(|a, b| {
        a.label_values(Category::Project)
            .cmp(&b.label_values(Category::Project))
    });

    assert_eq!(records.len(), 3);
    // Files outside any repository land in the nameless "no project" heap.
    assert_eq!(records[0].label_values(Category::Project), vec![""]);
    assert_eq!(records[0].label_values(Category::Filename), vec!["try.py"]);
    assert_eq!(records[1].label_values(Category::Filename), vec!["server.rs", "build.rs"]);
    assert_eq!(records[1].label_values(Category::Language), vec!["rust"]);
    assert_eq!(records[2].label_values(Category::Branch), vec!["refs/heads/develop"]);
    assert_eq!(records[2].label_values(Category::Git), vec![""]);
    assert!(records.iter().all(|r| r.session_id == records[0].session_id));
}

#[test]
fn flushed_records_reach_the_collector() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let proj = temp_dir.path().join("proj");
    init_fake_repo(&proj.join("app"), "main", &[ORIGIN]);

    let pipeline = open_pipeline(&temp_dir);
    pipeline
        .record_keystroke("code", Utc::now() - Duration::seconds(60))
        .expect("keystroke");
    pipeline
        .record_code_event(&code_event(&proj, proj.join("app/main.go"), b"package main\n"))
        .expect("record event");
    pipeline.tick(Utc::now()).expect("tick");

    let transport = Arc::new(RecordingTransport::default());
    let worker = DeliveryWorker::new(pipeline.queue().clone(), transport.clone());
    let summary = worker.run_pass().expect("delivery pass");

    assert_eq!(summary.delivered, 1);
    assert!(pipeline.queue().is_empty().expect("queue"));
    let sent: Record =
        serde_json::from_slice(&transport.bodies.lock().unwrap()[0]).expect("sent json");
    assert_eq!(sent.label_values(Category::Project), vec!["app"]);
}

#[test]
fn restarted_pipeline_resumes_and_flushes_leftover_heaps() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let proj = temp_dir.path().join("proj");
    init_fake_repo(&proj.join("app"), "main", &[ORIGIN]);

    let session_id = {
        let pipeline = open_pipeline(&temp_dir);
        pipeline
            .record_keystroke("code", Utc::now() - Duration::seconds(90))
            .expect("keystroke");
        pipeline
            .record_code_event(&code_event(&proj, proj.join("app/main.go"), b"package main\n"))
            .expect("record event");
        pipeline.meta().expect("meta").session_id
    };

    let restarted = open_pipeline(&temp_dir);
    assert_eq!(restarted.meta().expect("meta").session_id, session_id);
    assert_eq!(restarted.tick(Utc::now()).expect("tick").flushed_records, 1);
}

#[test]
fn watched_edit_flows_into_heap() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    std::fs::create_dir_all(temp_dir.path().join("proj")).expect("proj");
    let proj = temp_dir
        .path()
        .join("proj")
        .canonicalize()
        .expect("canonical proj");
    let app = proj.join("app");
    init_fake_repo(&app, "main", &[ORIGIN]);

    let pipeline = open_pipeline(&temp_dir);
    let (tx, rx) = mpsc::channel();
    let sink = pipeline.clone();
    let handle = CodeWatcher::spawn(
        proj.clone(),
        &WatcherConfig {
            poll_interval_secs: 1,
            ..WatcherConfig::default()
        },
        move |event| {
            if let Ok(event) = &event {
                let _ = tx.send(event.path.clone());
            }
            sink.handle_code_event(event);
        },
    )
    .expect("spawn watcher");

    let target = app.join("main.go");
    let deadline = Instant::now() + StdDuration::from_secs(15);
    let mut seen = false;
    while !seen && Instant::now() < deadline {
        std::fs::write(&target, "package main\n").expect("write main.go");
        while let Ok(path) = rx.recv_timeout(StdDuration::from_millis(500)) {
            if path == target {
                seen = true;
                break;
            }
        }
    }
    handle.stop();
    assert!(seen, "watcher never reported main.go");

    let heaps = pipeline.heaps().list().expect("heaps");
    assert_eq!(heaps.len(), 1);
    assert_eq!(heaps[0].project, "app");
    assert_eq!(heaps[0].files, vec!["main.go"]);
    assert_eq!(heaps[0].languages, vec!["go"]);
}

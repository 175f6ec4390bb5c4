//! Directory watching with a native backend and a polling fallback.
//!
//! Every directory under a root is registered individually (non-recursive) so
//! ignore rules apply at any depth and each directory can land on whichever
//! backend accepts it. The OS event backend is tried first; directories it
//! refuses (watch limits, network mounts) fall back to the polling backend.
//! Both backends feed a single channel drained by one dispatcher thread, which
//! owns the backends and their watched-directory sets.

use notify::event::{MetadataKind, ModifyKind};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::classify::{classify, Classification, SNIFF_LEN};
use crate::config::WatcherConfig;
use crate::error::{AgentError, Result};
use crate::ignore::IgnoreRules;

/// One qualifying write, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeEvent {
    pub root: PathBuf,
    pub path: PathBuf,
    pub file_name: String,
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Native,
    Poll,
}

impl Backend {
    fn other(self) -> Self {
        match self {
            Backend::Native => Backend::Poll,
            Backend::Poll => Backend::Native,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Backend::Native => "native",
            Backend::Poll => "poll",
        }
    }
}

enum Message {
    Event(Backend, notify::Result<Event>),
    Stop,
}

/// What a raw notify event means for the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Written,
    Removed,
    Irrelevant,
}

fn change_of(kind: &EventKind) -> Change {
    match kind {
        EventKind::Create(_) => Change::Written,
        EventKind::Remove(_) => Change::Removed,
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Name(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Other) => Change::Written,
        // The poll backend reports content changes as mtime updates.
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)) => Change::Written,
        _ => Change::Irrelevant,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backends
// ─────────────────────────────────────────────────────────────────────────────

struct Backends {
    native: Option<RecommendedWatcher>,
    poll: Option<PollWatcher>,
    native_dirs: HashSet<PathBuf>,
    poll_dirs: HashSet<PathBuf>,
}

impl Backends {
    fn new(tx: &Sender<Message>, config: &WatcherConfig) -> Result<Self> {
        let native = if config.native {
            let native_tx = tx.clone();
            match RecommendedWatcher::new(
                move |res: notify::Result<Event>| {
                    let _ = native_tx.send(Message::Event(Backend::Native, res));
                },
                notify::Config::default(),
            ) {
                Ok(watcher) => Some(watcher),
                Err(err) => {
                    warn!(error = %err, "Native watch backend unavailable; using polling");
                    None
                }
            }
        } else {
            None
        };

        let poll_tx = tx.clone();
        let poll = match PollWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = poll_tx.send(Message::Event(Backend::Poll, res));
            },
            notify::Config::default().with_poll_interval(config.poll_interval()),
        ) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(error = %err, "Polling watch backend unavailable");
                None
            }
        };

        if native.is_none() && poll.is_none() {
            return Err(AgentError::Watch(
                "neither the native nor the polling backend could start".to_string(),
            ));
        }

        Ok(Self {
            native,
            poll,
            native_dirs: HashSet::new(),
            poll_dirs: HashSet::new(),
        })
    }

    fn owner_of(&self, dir: &Path) -> Option<Backend> {
        if self.native_dirs.contains(dir) {
            Some(Backend::Native)
        } else if self.poll_dirs.contains(dir) {
            Some(Backend::Poll)
        } else {
            None
        }
    }

    fn is_watched(&self, dir: &Path) -> bool {
        self.owner_of(dir).is_some()
    }

    fn len(&self) -> usize {
        self.native_dirs.len() + self.poll_dirs.len()
    }

    /// Registers `dir` with `preferred` (native when unspecified), falling back
    /// to the other backend. Returns the backend that accepted it.
    fn register(&mut self, dir: &Path, preferred: Option<Backend>) -> Result<Backend> {
        if let Some(owner) = self.owner_of(dir) {
            return Ok(owner);
        }

        let first = preferred.unwrap_or(Backend::Native);
        let mut failures = Vec::new();
        for backend in [first, first.other()] {
            match self.try_watch(backend, dir) {
                Ok(true) => {
                    self.dirs_mut(backend).insert(dir.to_path_buf());
                    return Ok(backend);
                }
                Ok(false) => {}
                Err(err) => failures.push(format!("{}: {}", backend.as_str(), err)),
            }
        }

        Err(AgentError::WatchUnavailable {
            path: dir.to_path_buf(),
            details: if failures.is_empty() {
                "no backend available".to_string()
            } else {
                failures.join("; ")
            },
        })
    }

    /// `Ok(false)` when the backend is not running at all.
    fn try_watch(&mut self, backend: Backend, dir: &Path) -> notify::Result<bool> {
        match backend {
            Backend::Native => match self.native.as_mut() {
                Some(watcher) => watcher.watch(dir, RecursiveMode::NonRecursive).map(|_| true),
                None => Ok(false),
            },
            Backend::Poll => match self.poll.as_mut() {
                Some(watcher) => watcher.watch(dir, RecursiveMode::NonRecursive).map(|_| true),
                None => Ok(false),
            },
        }
    }

    fn dirs_mut(&mut self, backend: Backend) -> &mut HashSet<PathBuf> {
        match backend {
            Backend::Native => &mut self.native_dirs,
            Backend::Poll => &mut self.poll_dirs,
        }
    }

    /// Drops `dir` and everything below it from whichever backend holds them.
    fn unregister_tree(&mut self, dir: &Path) -> usize {
        let mut removed = 0;
        for backend in [Backend::Native, Backend::Poll] {
            let doomed: Vec<PathBuf> = self
                .dirs_mut(backend)
                .iter()
                .filter(|watched| watched.starts_with(dir))
                .cloned()
                .collect();
            for path in doomed {
                self.dirs_mut(backend).remove(&path);
                let result = match backend {
                    Backend::Native => self.native.as_mut().map(|w| w.unwatch(&path)),
                    Backend::Poll => self.poll.as_mut().map(|w| w.unwatch(&path)),
                };
                // The directory is usually gone already, so unwatch failures are expected.
                if let Some(Err(err)) = result {
                    debug!(path = %path.display(), error = %err, "Unwatch after removal failed");
                }
                removed += 1;
            }
        }
        removed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Watcher
// ─────────────────────────────────────────────────────────────────────────────

/// Running watcher for one root. Dropping it stops the dispatcher.
pub struct WatchHandle {
    root: PathBuf,
    tx: Sender<Message>,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stops both backends and waits for the dispatcher thread to exit.
    pub fn stop(mut self) {
        let _ = self.tx.send(Message::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(root = %self.root.display(), "Watcher thread panicked");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Stop);
    }
}

pub struct CodeWatcher;

impl CodeWatcher {
    /// Starts watching `root` and reports qualifying writes through `on_event`.
    ///
    /// Fails only when the root itself cannot be watched by any backend.
    /// Everything after that (unwatchable subdirectories, backend errors) is
    /// reported through `on_event` as an `Err`.
    pub fn spawn<F>(root: PathBuf, config: &WatcherConfig, mut on_event: F) -> Result<WatchHandle>
    where
        F: FnMut(Result<CodeEvent>) + Send + 'static,
    {
        let metadata = std::fs::metadata(&root).map_err(|err| AgentError::WatchUnavailable {
            path: root.clone(),
            details: err.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(AgentError::WatchUnavailable {
                path: root.clone(),
                details: "not a directory".to_string(),
            });
        }
        // Some backends report resolved paths (macOS /var -> /private/var).
        let root = std::fs::canonicalize(&root).unwrap_or(root);

        let (tx, rx) = mpsc::channel();
        let mut backends = Backends::new(&tx, config)?;
        let rules = IgnoreRules::new(&config.ignore_directories);

        backends.register(&root, None)?;
        register_tree(&mut backends, &rules, &root, &root, None, &mut on_event);

        info!(
            root = %root.display(),
            native = backends.native_dirs.len(),
            poll = backends.poll_dirs.len(),
            "Watching directory tree"
        );

        let dispatcher = Dispatcher {
            root: root.clone(),
            rules,
            backends,
            on_event,
        };
        let thread = thread::spawn(move || dispatcher.run(rx));

        Ok(WatchHandle {
            root,
            tx,
            thread: Some(thread),
        })
    }
}

/// Registers every non-ignored directory strictly below `start`.
fn register_tree<F>(
    backends: &mut Backends,
    rules: &IgnoreRules,
    root: &Path,
    start: &Path,
    preferred: Option<Backend>,
    on_event: &mut F,
) where
    F: FnMut(Result<CodeEvent>),
{
    let walker = WalkDir::new(start)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            !entry.file_type().is_dir()
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| rules.is_ignored_name(name))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                // Unreadable directories are skipped, not fatal.
                debug!(root = %root.display(), error = %err, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Err(err) = backends.register(entry.path(), preferred) {
            on_event(Err(err));
        }
    }
}

struct Dispatcher<F> {
    root: PathBuf,
    rules: IgnoreRules,
    backends: Backends,
    on_event: F,
}

impl<F> Dispatcher<F>
where
    F: FnMut(Result<CodeEvent>),
{
    fn run(mut self, rx: Receiver<Message>) {
        while let Ok(message) = rx.recv() {
            match message {
                Message::Stop => break,
                Message::Event(_, Err(err)) => {
                    (self.on_event)(Err(AgentError::Watch(err.to_string())));
                }
                Message::Event(backend, Ok(event)) => self.handle(backend, event),
            }
        }
        debug!(root = %self.root.display(), "Watcher stopped");
    }

    fn handle(&mut self, backend: Backend, event: Event) {
        let change = change_of(&event.kind);
        if change == Change::Irrelevant {
            return;
        }

        for path in event.paths {
            if self.rules.is_ignored_path(&self.root, &path) {
                continue;
            }
            match change {
                Change::Removed => self.removed(&path),
                Change::Written => self.written(backend, &path),
                Change::Irrelevant => {}
            }
        }
    }

    fn removed(&mut self, path: &Path) {
        let dropped = self.backends.unregister_tree(path);
        if dropped > 0 {
            debug!(path = %path.display(), dirs = dropped, "Stopped watching removed directory");
        }
    }

    fn written(&mut self, backend: Backend, path: &Path) {
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // Renamed away or deleted before we looked.
                self.removed(path);
                return;
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Skipping unreadable path");
                return;
            }
        };

        if metadata.is_dir() {
            self.directory_created(backend, path);
            return;
        }
        if !metadata.is_file() {
            return;
        }

        let bytes = match read_head(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Skipping unreadable file");
                return;
            }
        };

        // Directory rules only apply below the root, never to its ancestors.
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        match classify(relative, &bytes) {
            Classification::Record { language } => {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default();
                (self.on_event)(Ok(CodeEvent {
                    root: self.root.clone(),
                    path: path.to_path_buf(),
                    file_name,
                    language,
                }));
            }
            Classification::Skip(reason) => {
                debug!(path = %path.display(), reason = reason.as_str(), "Write not recorded");
            }
        }
    }

    fn directory_created(&mut self, backend: Backend, dir: &Path) {
        if self.backends.is_watched(dir) {
            return;
        }
        let preferred = dir
            .parent()
            .and_then(|parent| self.backends.owner_of(parent))
            .unwrap_or(backend);

        match self.backends.register(dir, Some(preferred)) {
            Ok(_) => {
                register_tree(
                    &mut self.backends,
                    &self.rules,
                    &self.root,
                    dir,
                    Some(preferred),
                    &mut self.on_event,
                );
                debug!(
                    dir = %dir.display(),
                    watched = self.backends.len(),
                    "Watching new directory"
                );
            }
            Err(err) => (self.on_event)(Err(err)),
        }
    }
}

fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = fs_err::File::open(path)?;
    let mut bytes = Vec::new();
    file.take(SNIFF_LEN as u64).read_to_end(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::sync::mpsc::RecvTimeoutError;
    use std::time::{Duration, Instant};

    fn test_config() -> WatcherConfig {
        WatcherConfig {
            native: true,
            poll_interval_secs: 1,
            ignore_directories: vec!["generated".to_string()],
        }
    }

    fn spawn_collecting(root: &Path) -> (WatchHandle, Receiver<Result<CodeEvent>>) {
        let (tx, rx) = mpsc::channel();
        let handle = CodeWatcher::spawn(root.to_path_buf(), &test_config(), move |event| {
            let _ = tx.send(event);
        })
        .expect("spawn watcher");
        (handle, rx)
    }

    /// Keeps rewriting `path` until an event for it arrives.
    fn write_until_seen(
        rx: &Receiver<Result<CodeEvent>>,
        path: &Path,
        contents: &str,
    ) -> Option<CodeEvent> {
        let deadline = Instant::now() + Duration::from_secs(15);
        while Instant::now() < deadline {
            fs_err::write(path, contents).expect("write file");
            let slice_end = Instant::now() + Duration::from_millis(1500);
            while Instant::now() < slice_end {
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(Ok(event)) if event.path == path => return Some(event),
                    Ok(_) => {}
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return None,
                }
            }
        }
        None
    }

    #[test]
    fn classifies_change_kinds() {
        assert_eq!(change_of(&EventKind::Create(CreateKind::File)), Change::Written);
        assert_eq!(
            change_of(&EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Change::Written
        );
        assert_eq!(
            change_of(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime))),
            Change::Written
        );
        assert_eq!(
            change_of(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions))),
            Change::Irrelevant
        );
        assert_eq!(change_of(&EventKind::Remove(RemoveKind::Folder)), Change::Removed);
        assert_eq!(
            change_of(&EventKind::Access(notify::event::AccessKind::Any)),
            Change::Irrelevant
        );
    }

    #[test]
    fn missing_root_fails_to_start() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let result = CodeWatcher::spawn(
            temp_dir.path().join("does-not-exist"),
            &test_config(),
            |_| {},
        );
        assert!(matches!(result, Err(AgentError::WatchUnavailable { .. })));
    }

    #[test]
    fn reports_source_writes_with_language() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let root = temp_dir.path().canonicalize().expect("canonical root");
        fs_err::create_dir_all(root.join("app")).expect("app dir");
        let (handle, rx) = spawn_collecting(&root);

        let event = write_until_seen(&rx, &root.join("app/main.go"), "package main\n")
            .expect("main.go event");
        assert_eq!(event.file_name, "main.go");
        assert_eq!(event.language, "go");
        assert_eq!(event.root, root);

        handle.stop();
    }

    #[test]
    fn new_directories_are_watched() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let root = temp_dir.path().canonicalize().expect("canonical root");
        let (handle, rx) = spawn_collecting(&root);

        fs_err::create_dir_all(root.join("pkg/inner")).expect("new dirs");
        let event = write_until_seen(&rx, &root.join("pkg/inner/lib.rs"), "pub fn f() {}\n")
            .expect("lib.rs event");
        assert_eq!(event.language, "rust");

        handle.stop();
    }

    #[test]
    fn ignored_directories_and_non_code_are_dropped() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let root = temp_dir.path().canonicalize().expect("canonical root");
        fs_err::create_dir_all(root.join("node_modules/dep")).expect("node_modules");
        fs_err::create_dir_all(root.join("generated")).expect("generated");
        let (handle, rx) = spawn_collecting(&root);

        fs_err::write(root.join("node_modules/dep/index.js"), "x").expect("vendored");
        fs_err::write(root.join("generated/api.go"), "package api").expect("generated");
        fs_err::write(root.join("notes.txt"), "hello").expect("text");
        fs_err::write(root.join("build.log"), "ok").expect("log");

        let event =
            write_until_seen(&rx, &root.join("app.py"), "print(1)\n").expect("app.py event");
        assert_eq!(event.language, "python");

        // Anything that slipped through must be app.py itself.
        while let Ok(Ok(other)) = rx.recv_timeout(Duration::from_millis(200)) {
            assert_eq!(other.path, root.join("app.py"));
        }

        handle.stop();
    }

    #[test]
    fn polling_backend_alone_follows_new_directories() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let root = temp_dir.path().canonicalize().expect("canonical root");
        let (tx, rx) = mpsc::channel();
        let config = WatcherConfig {
            native: false,
            ..test_config()
        };
        let handle = CodeWatcher::spawn(root.clone(), &config, move |event| {
            let _ = tx.send(event);
        })
        .expect("spawn poll watcher");

        fs_err::create_dir_all(root.join("pkg")).expect("pkg dir");
        let event = write_until_seen(&rx, &root.join("pkg/a.rs"), "pub fn a() {}\n")
            .expect("pkg/a.rs event");
        assert_eq!(event.language, "rust");
        assert_eq!(event.file_name, "a.rs");

        handle.stop();
    }

    #[test]
    fn root_below_docs_directory_still_records() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let base = temp_dir.path().canonicalize().expect("canonical base");
        let root = base.join("docs").join("proj");
        fs_err::create_dir_all(root.join("app")).expect("app dir");
        let (handle, rx) = spawn_collecting(&root);

        let event = write_until_seen(&rx, &root.join("app/main.go"), "package main\n")
            .expect("main.go event");
        assert_eq!(event.language, "go");

        handle.stop();
    }
}


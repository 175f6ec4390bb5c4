//! Long-lived agent state: the pipeline plus one watcher per watch root.

use pacerank_core::config::{AgentConfig, WatcherConfig};
use pacerank_core::ignore::reject_watch_root;
use pacerank_core::{
    CodeWatcher, DeliveryWorker, Pipeline, Shutdown, Store, Transport, WatchHandle, WatchRoot,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, warn};

pub struct Runtime {
    pipeline: Pipeline,
    watcher_config: WatcherConfig,
    watchers: Mutex<HashMap<PathBuf, WatchHandle>>,
    shutdown: Shutdown,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(store: Arc<Store>, config: &AgentConfig) -> Result<Self, String> {
        let pipeline = Pipeline::open(store, &config.session)
            .map_err(|err| format!("Failed to open pipeline: {}", err))?;
        Ok(Self {
            pipeline,
            watcher_config: config.watcher.clone(),
            watchers: Mutex::new(HashMap::new()),
            shutdown: Shutdown::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Starts the session ticker and the delivery worker.
    pub fn start_background(
        &self,
        config: &AgentConfig,
        transport: Arc<dyn Transport>,
    ) {
        let ticker = self
            .pipeline
            .spawn_ticker(config.session.tick_interval(), self.shutdown.clone());
        let worker = Arc::new(DeliveryWorker::new(self.pipeline.queue().clone(), transport));
        let delivery = worker.spawn(config.delivery.interval(), self.shutdown.clone());
        if let Ok(mut workers) = self.workers.lock() {
            workers.push(ticker);
            workers.push(delivery);
        }
    }

    /// Starts a watcher for every persisted root. A root that cannot be
    /// watched is logged and skipped; it stays persisted.
    pub fn watch_persisted_roots(&self) -> Result<usize, String> {
        let roots = self
            .pipeline
            .store()
            .directories()
            .map_err(|err| format!("Failed to list watch roots: {}", err))?;
        let mut started = 0;
        for root in roots {
            if self.is_watching(&root.path) {
                started += 1;
                continue;
            }
            match self.start_watcher(&root.path) {
                Ok(()) => started += 1,
                Err(err) => warn!(path = %root.path.display(), error = %err, "Watch root skipped"),
            }
        }
        Ok(started)
    }

    /// Persists `path` as a watch root and starts watching it.
    /// Returns `false` when it was already watched.
    pub fn add_root(&self, path: &Path) -> Result<bool, String> {
        if let Some(reason) = reject_watch_root(path) {
            return Err(reason);
        }
        if !path.is_dir() {
            return Err(format!("'{}' is not a directory", path.display()));
        }

        let inserted = self
            .pipeline
            .store()
            .add_directory(path)
            .map_err(|err| format!("Failed to persist watch root: {}", err))?;
        let running = self.is_watching(path);
        if !running {
            self.start_watcher(path)?;
        }
        Ok(inserted || !running)
    }

    /// Forgets `path` and stops its watcher. Returns `false` if it was unknown.
    pub fn remove_root(&self, path: &Path) -> Result<bool, String> {
        let removed = self
            .pipeline
            .store()
            .remove_directory(path)
            .map_err(|err| format!("Failed to remove watch root: {}", err))?;
        let handle = self
            .watchers
            .lock()
            .map_err(|_| "Watcher registry poisoned".to_string())?
            .remove(path);
        let stopped = handle.is_some();
        if let Some(handle) = handle {
            handle.stop();
            info!(path = %path.display(), "Stopped watching root");
        }
        Ok(removed || stopped)
    }

    pub fn roots(&self) -> Result<Vec<WatchRoot>, String> {
        self.pipeline
            .store()
            .directories()
            .map_err(|err| format!("Failed to list watch roots: {}", err))
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watchers
            .lock()
            .map(|watchers| watchers.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn is_watching(&self, path: &Path) -> bool {
        self.watchers
            .lock()
            .map(|watchers| watchers.contains_key(path))
            .unwrap_or(false)
    }

    fn start_watcher(&self, path: &Path) -> Result<(), String> {
        let sink = self.pipeline.clone();
        let handle = CodeWatcher::spawn(path.to_path_buf(), &self.watcher_config, move |event| {
            sink.handle_code_event(event)
        })
        .map_err(|err| err.to_string())?;

        let mut watchers = self
            .watchers
            .lock()
            .map_err(|_| "Watcher registry poisoned".to_string())?;
        if let Some(previous) = watchers.insert(path.to_path_buf(), handle) {
            previous.stop();
        }
        info!(path = %path.display(), "Watching root");
        Ok(())
    }

    /// Stops watchers and background workers, waiting for them to exit.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        let handles: Vec<WatchHandle> = self
            .watchers
            .lock()
            .map(|mut watchers| watchers.drain().map(|(_, handle)| handle).collect())
            .unwrap_or_default();
        for handle in handles {
            handle.stop();
        }
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .map(|mut workers| workers.drain(..).collect())
            .unwrap_or_default();
        for worker in workers {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(temp_dir: &tempfile::TempDir) -> Runtime {
        let store = Store::open(temp_dir.path().join("agent.db")).expect("store init");
        Runtime::new(Arc::new(store), &AgentConfig::default()).expect("runtime")
    }

    #[test]
    fn add_and_remove_root() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let root = temp_dir.path().join("proj");
        std::fs::create_dir_all(&root).expect("proj");
        let runtime = runtime(&temp_dir);

        assert!(runtime.add_root(&root).unwrap());
        assert!(!runtime.add_root(&root).unwrap());
        assert_eq!(runtime.watched_paths(), vec![root.clone()]);
        assert_eq!(runtime.roots().unwrap()[0].path, root);

        assert!(runtime.remove_root(&root).unwrap());
        assert!(runtime.watched_paths().is_empty());
        assert!(runtime.roots().unwrap().is_empty());
        assert!(!runtime.remove_root(&root).unwrap());
        runtime.shutdown();
    }

    #[test]
    fn rejects_broad_or_missing_roots() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let runtime = runtime(&temp_dir);

        assert!(runtime.add_root(Path::new("/")).is_err());
        assert!(runtime.add_root(&temp_dir.path().join("missing")).is_err());
        assert!(runtime.roots().unwrap().is_empty());
    }

    #[test]
    fn persisted_roots_restart_watchers() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let root = temp_dir.path().join("proj");
        std::fs::create_dir_all(&root).expect("proj");
        {
            let runtime = runtime(&temp_dir);
            runtime.add_root(&root).unwrap();
            runtime.shutdown();
        }

        let runtime = runtime(&temp_dir);
        assert_eq!(runtime.watch_persisted_roots().unwrap(), 1);
        assert_eq!(runtime.watched_paths(), vec![root]);
        runtime.shutdown();
    }
}

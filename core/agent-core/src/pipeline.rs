//! Wires watcher events and keystrokes into heaps, meta and the queue.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::heaps::Heaps;
use crate::project::{resolve, ProjectInfo};
use crate::queue::Queue;
use crate::session::{Meta, SessionTracker, TickOutcome};
use crate::shutdown::Shutdown;
use crate::store::Store;
use crate::watcher::CodeEvent;

#[derive(Clone)]
pub struct Pipeline {
    store: Arc<Store>,
    heaps: Heaps,
    session: SessionTracker,
    queue: Queue,
}

impl Pipeline {
    /// Builds the pipeline and resumes (or starts) the stored session.
    pub fn open(store: Arc<Store>, config: &SessionConfig) -> Result<Self> {
        let pipeline = Self {
            heaps: Heaps::new(store.clone()),
            session: SessionTracker::new(store.clone(), config),
            queue: Queue::new(store.clone()),
            store,
        };
        let meta = pipeline.session.resume_or_start()?;
        info!(
            session_id = %meta.session_id,
            keypress_count = meta.keypress_count,
            "Session ready"
        );
        Ok(pipeline)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn heaps(&self) -> &Heaps {
        &self.heaps
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn meta(&self) -> Result<Meta> {
        self.session.meta()
    }

    /// Resolves the event's project and adds it to that project's heap.
    pub fn record_code_event(&self, event: &CodeEvent) -> Result<ProjectInfo> {
        let info = resolve(&event.path, &event.root);
        self.heaps.record(&info, &event.file_name, &event.language)?;
        debug!(
            project_id = %info.project_id,
            file = %event.file_name,
            language = %event.language,
            "Recorded code event"
        );
        Ok(info)
    }

    /// Callback shape used by watchers: errors are logged, never propagated.
    pub fn handle_code_event(&self, event: Result<CodeEvent>) {
        match event {
            Ok(event) => {
                if let Err(err) = self.record_code_event(&event) {
                    warn!(
                        path = %event.path.display(),
                        error = %err,
                        "Failed to record code event"
                    );
                }
            }
            Err(err) => warn!(error = %err, "Watcher reported an error"),
        }
    }

    pub fn record_keystroke(
        &self,
        process: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<&'static str>> {
        self.session.record_keystroke(process, at)
    }

    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let outcome = self.session.tick(now)?;
        if outcome.flushed {
            info!(records = outcome.flushed_records, "Flushed idle heaps to queue");
        }
        if outcome.session_reset {
            info!("Session window elapsed; started a new session");
        }
        Ok(outcome)
    }

    /// Re-evaluates the session every `interval` until `shutdown` fires.
    /// A failed tick is logged and simply retried on the next one.
    pub fn spawn_ticker(&self, interval: Duration, shutdown: Shutdown) -> JoinHandle<()> {
        let pipeline = self.clone();
        thread::spawn(move || loop {
            if shutdown.wait(interval) {
                debug!("Session ticker stopping");
                break;
            }
            if let Err(err) = pipeline.tick(Utc::now()) {
                warn!(error = %err, "Session tick abandoned");
            }
        })
    }
}

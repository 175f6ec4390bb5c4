//! Periodic hand-off of queued records to the collector.

use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::queue::{DeliveryOutcome, DrainSummary, Queue, QueueEntry};
use crate::shutdown::Shutdown;

/// Only the collector's 200 counts as an acknowledgment.
pub const STATUS_ACCEPTED: u16 = 200;

/// Failures are logged on the first occurrence and then every this many passes.
const FAILURE_LOG_EVERY: u32 = 12;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportReply {
    pub status: u16,
    pub correlation_id: String,
    pub service: String,
    pub body: Option<Value>,
    pub error: Option<String>,
}

impl TransportReply {
    pub fn is_accepted(&self) -> bool {
        self.status == STATUS_ACCEPTED && self.error.is_none()
    }
}

/// Sends one serialized record. `Err` covers timeouts and connection failures.
pub trait Transport: Send + Sync {
    fn send(&self, payload: &[u8]) -> Result<TransportReply>;
}

pub struct DeliveryWorker {
    queue: Queue,
    transport: Arc<dyn Transport>,
    consecutive_failures: AtomicU32,
}

impl DeliveryWorker {
    pub fn new(queue: Queue, transport: Arc<dyn Transport>) -> Self {
        Self {
            queue,
            transport,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Drains the queue once, stopping at the first entry that is not acknowledged.
    pub fn run_pass(&self) -> Result<DrainSummary> {
        let mut last_failure: Option<String> = None;
        let summary = self.queue.drain_in_order(|entry| {
            let (outcome, failure) = self.deliver(entry);
            last_failure = failure;
            outcome
        })?;

        if summary.delivered > 0 {
            info!(
                delivered = summary.delivered,
                remaining = summary.remaining,
                "Delivered queued records"
            );
        }

        match (summary.stopped_at, last_failure) {
            (Some(seq), Some(reason)) => self.note_failure(seq, &reason, summary.remaining),
            _ => {
                let previous = self.consecutive_failures.swap(0, Ordering::Relaxed);
                if previous > 0 {
                    info!(failed_passes = previous, "Collector reachable again");
                }
            }
        }

        Ok(summary)
    }

    /// Runs [`Self::run_pass`] every `interval` until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: Shutdown) -> JoinHandle<()> {
        thread::spawn(move || loop {
            if shutdown.wait(interval) {
                debug!("Delivery worker stopping");
                break;
            }
            if let Err(err) = self.run_pass() {
                warn!(error = %err, "Delivery pass abandoned");
            }
        })
    }

    fn deliver(&self, entry: &QueueEntry) -> (DeliveryOutcome, Option<String>) {
        match self.transport.send(&entry.payload) {
            Ok(reply) if reply.is_accepted() => {
                debug!(
                    seq = entry.seq,
                    correlation_id = %reply.correlation_id,
                    "Collector acknowledged record"
                );
                (DeliveryOutcome::Delivered, None)
            }
            Ok(reply) => {
                let reason = match reply.error {
                    Some(error) => format!("status {}: {}", reply.status, error),
                    None => format!("status {}", reply.status),
                };
                (DeliveryOutcome::Retry, Some(reason))
            }
            Err(err) => (DeliveryOutcome::Retry, Some(err.to_string())),
        }
    }

    fn note_failure(&self, seq: i64, reason: &str, remaining: usize) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == 1 || failures % FAILURE_LOG_EVERY == 0 {
            warn!(
                seq,
                remaining,
                failed_passes = failures,
                reason,
                "Collector did not accept record; will retry"
            );
        } else {
            debug!(seq, failed_passes = failures, reason, "Delivery retry pending");
        }
    }
}

//! # pacerank-core
//!
//! Activity capture and durable delivery for the pacerank agent.
//!
//! ## Pipeline
//!
//! ```text
//! file writes ─▶ watcher ─▶ classify ─▶ project ─▶ heaps ─┐
//!                                                          ├─▶ session tick ─▶ queue ─▶ delivery
//! key presses ─▶ editors ─▶ session (meta) ───────────────┘
//! ```
//!
//! ## Design Principles
//!
//! - **Synchronous**: plain threads, no async runtime.
//! - **Store is the truth**: every component reads and writes through [`Store`];
//!   nothing caches heaps or meta in memory.
//! - **At-least-once**: queue entries disappear only after the collector
//!   acknowledges them.

pub mod classify;
pub mod config;
pub mod delivery;
pub mod editors;
pub mod error;
pub mod heaps;
pub mod ignore;
pub mod pipeline;
pub mod project;
pub mod queue;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod watcher;

#[cfg(test)]
mod integration_tests;

pub use classify::{classify, Classification, SkipReason};
pub use config::{load_config, AgentConfig, AgentPaths};
pub use delivery::{DeliveryWorker, Transport, TransportReply};
pub use error::{AgentError, Result};
pub use heaps::{Heap, Heaps};
pub use pipeline::Pipeline;
pub use project::{resolve, ProjectInfo, NO_PROJECT_ID};
pub use queue::{DeliveryOutcome, DrainSummary, Queue, QueueEntry};
pub use session::{Meta, SessionTracker, TickOutcome};
pub use shutdown::Shutdown;
pub use store::{Store, WatchRoot};
pub use watcher::{CodeEvent, CodeWatcher, WatchHandle};

//! # Tiered Queueing
//!
//! One queue per tier over two interchangeable backends: the
//! broker-backed queue (PostgreSQL rows claimed atomically with
//! `FOR UPDATE SKIP LOCKED`) and the in-process fallback queue used
//! transparently when the broker is unreachable. Both implement the same
//! [`QueueBackend`] contract and share a single priority-ordering
//! algorithm, so callers cannot observe which backend served them
//! except through the recorded [`BackendKind`].

pub mod backend;
pub mod broker;
pub mod errors;
pub mod job;
pub mod manager;
pub mod memory;
pub mod ordering;

pub use backend::{BackendKind, QueueBackend, ReclaimAction, ReclaimedJob};
pub use broker::BrokerQueue;
pub use errors::QueueError;
pub use job::{EnqueuedJob, Job, JobOptions, JobState, TierQueueStats};
pub use manager::TieredQueueManager;
pub use memory::InMemoryQueue;
pub use ordering::priority_score;

//! # Queue Backend Contract
//!
//! The one interface both queue implementations satisfy. The tiered
//! manager and worker pools program against this trait only; which
//! backend actually served a call is observable solely through
//! [`BackendKind`].

use crate::constants::Tier;
use crate::queue::errors::QueueError;
use crate::queue::job::{Job, TierQueueStats};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which queue implementation holds a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Broker-backed persistent queue.
    Broker,
    /// In-process, non-durable fallback queue.
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Broker => write!(f, "broker"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

/// What the reaper did with a job it reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimAction {
    /// Back in the queue, immediately ready.
    Requeued,
    /// Stall budget exhausted; job was dead-lettered.
    DeadLettered,
}

/// A job reclaimed from a worker that exceeded its budget (or died).
#[derive(Debug, Clone)]
pub struct ReclaimedJob {
    pub job: Job,
    pub action: ReclaimAction,
}

/// Contract shared by the broker-backed queue and the in-memory fallback.
///
/// Ordering guarantee for `dequeue`: strict priority-then-FIFO within one
/// tier, using the shared scoring algorithm in [`crate::queue::ordering`].
/// `dequeue` atomically transitions the returned job to Active, so at most
/// one worker holds a given job.
#[async_trait]
pub trait QueueBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Insert a job. The job's `ready_at` may lie in the future (delayed
    /// jobs); it must not be returned by `dequeue` before then.
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;

    /// Atomically claim the highest-priority ready job, marking it Active
    /// until `active_deadline`. Returns `None` when nothing is ready.
    async fn dequeue(
        &self,
        tier: Tier,
        active_deadline: DateTime<Utc>,
    ) -> Result<Option<Job>, QueueError>;

    /// Mark an Active job successfully finished.
    async fn complete(&self, tier: Tier, job_id: Uuid) -> Result<(), QueueError>;

    /// Return an Active job to the queue with its updated retry fields
    /// (`ready_at`, `retries_remaining`, `last_error`) already applied.
    async fn schedule_retry(&self, job: &Job) -> Result<(), QueueError>;

    /// Mark an Active job permanently failed (dead-lettered).
    async fn fail(&self, tier: Tier, job_id: Uuid, error: &str) -> Result<(), QueueError>;

    /// Reclaim jobs left Active past their deadline. Jobs within their
    /// stall budget are requeued immediately ready; the rest are
    /// dead-lettered. Returns everything touched so the caller can record
    /// dead letters and stats.
    async fn reclaim_stalled(
        &self,
        tier: Tier,
        now: DateTime<Utc>,
        max_stalled_count: u32,
    ) -> Result<Vec<ReclaimedJob>, QueueError>;

    async fn stats(&self, tier: Tier, now: DateTime<Utc>) -> Result<TierQueueStats, QueueError>;
}

//! # Job Model
//!
//! The unit of work flowing through the tiered queues, its lifecycle
//! states, and per-call enqueue options.

use crate::config::TierConfig;
use crate::constants::Tier;
use crate::queue::backend::BackendKind;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle states of a job.
///
/// `Created → Queued → Active → {Completed | Retrying → Queued |
/// Stalled → Queued (bounded) | DeadLettered}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Built but not yet handed to a queue
    Created,
    /// Waiting in a queue (possibly delayed until `ready_at`)
    Queued,
    /// Held by exactly one worker
    Active,
    /// Finished successfully
    Completed,
    /// Failed, rescheduled with backoff
    Retrying,
    /// Exceeded its processing-time budget, reclaimed
    Stalled,
    /// Retries or stall budget exhausted; retained for operators
    DeadLettered,
}

impl JobState {
    /// Terminal states permit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLettered)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Queued => write!(f, "queued"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Stalled => write!(f, "stalled"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "queued" => Ok(Self::Queued),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "retrying" => Ok(Self::Retrying),
            "stalled" => Ok(Self::Stalled),
            "dead_lettered" => Ok(Self::DeadLettered),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// Per-call overrides for [`crate::queue::TieredQueueManager::enqueue`].
/// Anything unset falls back to the tier's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: Option<i32>,
    pub delay: Option<Duration>,
    pub max_retries: Option<u32>,
}

impl JobOptions {
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A unit of work. Belongs to exactly one tier for its whole life;
/// `retries_remaining` only ever decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub tier: Tier,
    /// Lower = more urgent.
    pub priority: i32,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    /// Earliest instant a worker may pick the job up.
    pub ready_at: DateTime<Utc>,
    pub max_retries: u32,
    pub retries_remaining: u32,
    /// Times this job has been reclaimed after exceeding its budget.
    pub stalled_count: u32,
    pub status: JobState,
    /// Which backend currently holds the job.
    pub backend: BackendKind,
    pub last_error: Option<String>,
}

impl Job {
    /// Build a job from tier defaults plus per-call options.
    pub fn new(
        tier: Tier,
        payload: Value,
        tier_config: &TierConfig,
        options: &JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let delay = options.delay.unwrap_or(Duration::ZERO);
        let max_retries = options.max_retries.unwrap_or(tier_config.max_retries);
        Self {
            id: Uuid::new_v4(),
            tier,
            priority: options.priority.unwrap_or(tier_config.priority),
            payload,
            created_at: now,
            ready_at: now + ChronoDuration::milliseconds(delay.as_millis() as i64),
            max_retries,
            retries_remaining: max_retries,
            stalled_count: 0,
            status: JobState::Created,
            backend: BackendKind::Broker,
            last_error: None,
        }
    }

    /// Attempts already consumed (first run counts once retries begin).
    pub fn attempts_made(&self) -> u32 {
        self.max_retries - self.retries_remaining
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.ready_at <= now
    }

    /// Consume one retry and reschedule after `backoff`.
    pub fn prepare_retry(&mut self, backoff: Duration, error: &str, now: DateTime<Utc>) {
        debug_assert!(self.retries_remaining > 0);
        self.retries_remaining = self.retries_remaining.saturating_sub(1);
        self.ready_at = now + ChronoDuration::milliseconds(backoff.as_millis() as i64);
        self.status = JobState::Retrying;
        self.last_error = Some(error.to_string());
    }

    /// Record a stall reclaim; the job becomes ready immediately.
    pub fn prepare_stalled_requeue(&mut self, now: DateTime<Utc>) {
        self.stalled_count += 1;
        self.ready_at = now;
        self.status = JobState::Stalled;
    }
}

/// Result handed back to the caller of `enqueue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueuedJob {
    pub job_id: Uuid,
    pub queue_name: String,
    pub backend: BackendKind,
    /// Delay until the job becomes ready, zero for immediate jobs.
    pub estimated_delay_ms: u64,
}

/// Per-tier queue counters for the stats surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierQueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl TierQueueStats {
    /// Combine counters from two backends serving the same tier.
    pub fn merge(self, other: TierQueueStats) -> TierQueueStats {
        TierQueueStats {
            waiting: self.waiting + other.waiting,
            active: self.active + other.active,
            completed: self.completed + other.completed,
            failed: self.failed + other.failed,
            delayed: self.delayed + other.delayed,
        }
    }
}

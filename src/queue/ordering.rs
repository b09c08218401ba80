//! # Priority Ordering
//!
//! The single scoring algorithm shared by every queue backend. Keeping it
//! in one place is what guarantees the broker-backed queue and the
//! in-memory fallback stay behaviorally identical: both order by
//! `(score, insertion sequence)` where the score is computed here and
//! nowhere else.

use crate::constants::PRIORITY_WEIGHT;
use chrono::{DateTime, Utc};

/// Ordering score for a job: `priority * PRIORITY_WEIGHT + ready_at` in
/// epoch milliseconds. Lower score dequeues first, so priority dominates
/// and readiness time breaks priority groups apart chronologically.
pub fn priority_score(priority: i32, ready_at: DateTime<Utc>) -> i64 {
    i64::from(priority) * PRIORITY_WEIGHT + ready_at.timestamp_millis()
}

/// Composite key for the in-memory backend: score first, then the
/// monotonic insertion sequence so equal scores dequeue FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderingKey {
    pub score: i64,
    pub seq: u64,
}

impl OrderingKey {
    pub fn new(priority: i32, ready_at: DateTime<Utc>, seq: u64) -> Self {
        Self {
            score: priority_score(priority, ready_at),
            seq,
        }
    }
}

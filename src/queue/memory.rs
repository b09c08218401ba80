//! # In-Process Fallback Queue
//!
//! The non-durable substitute used transparently when the broker is
//! unreachable. Implements the identical [`QueueBackend`] contract with
//! sorted insertion keyed by the shared priority score, so callers cannot
//! observe any ordering difference from broker mode. Contents are lost on
//! process restart, an accepted availability/durability tradeoff for
//! non-Emergency tiers; the Emergency tier's stronger guarantee comes from
//! the direct-execution path, not from this queue.

use crate::constants::Tier;
use crate::queue::backend::{BackendKind, QueueBackend, ReclaimAction, ReclaimedJob};
use crate::queue::errors::QueueError;
use crate::queue::job::{Job, JobState, TierQueueStats};
use crate::queue::ordering::OrderingKey;
use crate::utils::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
struct ActiveJob {
    job: Job,
    deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TierState {
    /// Queued jobs in dequeue order (shared score, then insertion seq).
    ready: BTreeMap<OrderingKey, Job>,
    /// Jobs held by workers, keyed by id.
    active: HashMap<Uuid, ActiveJob>,
    completed: u64,
    failed: u64,
}

/// In-memory priority queue, one ordered map per tier.
#[derive(Debug)]
pub struct InMemoryQueue {
    tiers: HashMap<Tier, Mutex<TierState>>,
    seq: AtomicU64,
    max_depth: usize,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueue {
    pub fn new(max_depth: usize, clock: Arc<dyn Clock>) -> Self {
        let tiers = Tier::ALL
            .iter()
            .map(|tier| (*tier, Mutex::new(TierState::default())))
            .collect();
        Self {
            tiers,
            seq: AtomicU64::new(0),
            max_depth,
            clock,
        }
    }

    fn tier_state(&self, tier: Tier) -> &Mutex<TierState> {
        // Construction covers every Tier variant
        self.tiers.get(&tier).expect("tier state missing")
    }

    /// Number of queued (not active) jobs in one tier.
    pub fn depth(&self, tier: Tier) -> usize {
        self.tier_state(tier).lock().ready.len()
    }

    /// Remove up to `limit` queued jobs for promotion back to the broker,
    /// preserving their readiness times. Delayed jobs move too; the broker
    /// honors `ready_at` the same way this queue does.
    pub fn take_for_promotion(&self, tier: Tier, limit: usize) -> Vec<Job> {
        let mut state = self.tier_state(tier).lock();
        let keys: Vec<OrderingKey> = state.ready.keys().take(limit).copied().collect();
        keys.iter()
            .filter_map(|key| state.ready.remove(key))
            .collect()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueue {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let mut state = self.tier_state(job.tier).lock();
        if state.ready.len() >= self.max_depth {
            warn!(
                tier = %job.tier,
                depth = state.ready.len(),
                "🚧 Fallback queue at capacity, rejecting insert"
            );
            return Err(QueueError::CapacityExceeded {
                queue: job.tier.queue_name(),
                depth: state.ready.len(),
            });
        }

        let mut queued = job.clone();
        queued.status = JobState::Queued;
        queued.backend = BackendKind::Memory;

        let key = OrderingKey::new(
            queued.priority,
            queued.ready_at,
            self.seq.fetch_add(1, Ordering::Relaxed),
        );
        state.ready.insert(key, queued);
        Ok(())
    }

    async fn dequeue(
        &self,
        tier: Tier,
        active_deadline: DateTime<Utc>,
    ) -> Result<Option<Job>, QueueError> {
        let now = self.clock.now();
        let mut state = self.tier_state(tier).lock();

        let key = state
            .ready
            .iter()
            .find(|(_, job)| job.is_ready(now))
            .map(|(key, _)| *key);

        let Some(key) = key else {
            return Ok(None);
        };

        let mut job = state.ready.remove(&key).expect("key just observed");
        job.status = JobState::Active;
        state.active.insert(
            job.id,
            ActiveJob {
                job: job.clone(),
                deadline: active_deadline,
            },
        );
        Ok(Some(job))
    }

    async fn complete(&self, tier: Tier, job_id: Uuid) -> Result<(), QueueError> {
        let mut state = self.tier_state(tier).lock();
        if state.active.remove(&job_id).is_none() {
            return Err(QueueError::JobNotFound {
                id: job_id,
                queue: tier.queue_name(),
            });
        }
        state.completed += 1;
        Ok(())
    }

    async fn schedule_retry(&self, job: &Job) -> Result<(), QueueError> {
        let mut state = self.tier_state(job.tier).lock();
        if state.active.remove(&job.id).is_none() {
            return Err(QueueError::JobNotFound {
                id: job.id,
                queue: job.tier.queue_name(),
            });
        }

        let mut requeued = job.clone();
        requeued.status = JobState::Queued;
        let key = OrderingKey::new(
            requeued.priority,
            requeued.ready_at,
            self.seq.fetch_add(1, Ordering::Relaxed),
        );
        state.ready.insert(key, requeued);
        Ok(())
    }

    async fn fail(&self, tier: Tier, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        let mut state = self.tier_state(tier).lock();
        if state.active.remove(&job_id).is_none() {
            return Err(QueueError::JobNotFound {
                id: job_id,
                queue: tier.queue_name(),
            });
        }
        state.failed += 1;
        debug!(tier = %tier, job_id = %job_id, error = %error, "Job dead-lettered from memory queue");
        Ok(())
    }

    async fn reclaim_stalled(
        &self,
        tier: Tier,
        now: DateTime<Utc>,
        max_stalled_count: u32,
    ) -> Result<Vec<ReclaimedJob>, QueueError> {
        let mut state = self.tier_state(tier).lock();

        let expired: Vec<Uuid> = state
            .active
            .iter()
            .filter(|(_, entry)| entry.deadline < now)
            .map(|(id, _)| *id)
            .collect();

        let mut reclaimed = Vec::with_capacity(expired.len());
        for id in expired {
            let entry = state.active.remove(&id).expect("id just observed");
            let mut job = entry.job;
            job.prepare_stalled_requeue(now);

            if job.stalled_count > max_stalled_count {
                job.status = JobState::DeadLettered;
                state.failed += 1;
                reclaimed.push(ReclaimedJob {
                    job,
                    action: ReclaimAction::DeadLettered,
                });
            } else {
                job.status = JobState::Queued;
                let key = OrderingKey::new(
                    job.priority,
                    job.ready_at,
                    self.seq.fetch_add(1, Ordering::Relaxed),
                );
                state.ready.insert(key, job.clone());
                reclaimed.push(ReclaimedJob {
                    job,
                    action: ReclaimAction::Requeued,
                });
            }
        }
        Ok(reclaimed)
    }

    async fn stats(&self, tier: Tier, now: DateTime<Utc>) -> Result<TierQueueStats, QueueError> {
        let state = self.tier_state(tier).lock();
        let delayed = state
            .ready
            .values()
            .filter(|job| !job.is_ready(now))
            .count() as u64;
        Ok(TierQueueStats {
            waiting: state.ready.len() as u64 - delayed,
            active: state.active.len() as u64,
            completed: state.completed,
            failed: state.failed,
            delayed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::time::Duration;

    fn queue_with_clock() -> (InMemoryQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (InMemoryQueue::new(100, clock.clone()), clock)
    }

    fn job(tier: Tier, priority: i32, now: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            tier,
            priority,
            payload: json!({}),
            created_at: now,
            ready_at: now,
            max_retries: 3,
            retries_remaining: 3,
            stalled_count: 0,
            status: JobState::Created,
            backend: BackendKind::Memory,
            last_error: None,
        }
    }

    fn deadline(now: DateTime<Utc>) -> DateTime<Utc> {
        now + ChronoDuration::seconds(60)
    }

    #[tokio::test]
    async fn test_priority_then_fifo_ordering() {
        let (queue, clock) = queue_with_clock();
        let now = clock.now();

        let jobs: Vec<Job> = [3, 1, 2, 1]
            .iter()
            .map(|p| job(Tier::Standard, *p, now))
            .collect();
        for j in &jobs {
            queue.enqueue(j).await.unwrap();
        }

        let mut order = Vec::new();
        while let Some(j) = queue.dequeue(Tier::Standard, deadline(now)).await.unwrap() {
            order.push(j.id);
            queue.complete(Tier::Standard, j.id).await.unwrap();
        }

        // [p1 first inserted, p1 second inserted, p2, p3]
        assert_eq!(order, vec![jobs[1].id, jobs[3].id, jobs[2].id, jobs[0].id]);
    }

    #[tokio::test]
    async fn test_delayed_job_held_until_ready() {
        let (queue, clock) = queue_with_clock();
        let now = clock.now();

        let mut delayed = job(Tier::Standard, 1, now);
        delayed.ready_at = now + ChronoDuration::seconds(30);
        queue.enqueue(&delayed).await.unwrap();

        assert!(queue
            .dequeue(Tier::Standard, deadline(now))
            .await
            .unwrap()
            .is_none());

        clock.advance(Duration::from_secs(31));
        let claimed = queue
            .dequeue(Tier::Standard, deadline(clock.now()))
            .await
            .unwrap();
        assert_eq!(claimed.unwrap().id, delayed.id);
    }

    #[tokio::test]
    async fn test_ready_lower_priority_outranks_delayed_higher() {
        let (queue, clock) = queue_with_clock();
        let now = clock.now();

        let mut urgent_later = job(Tier::Standard, 1, now);
        urgent_later.ready_at = now + ChronoDuration::seconds(60);
        let routine_now = job(Tier::Standard, 5, now);

        queue.enqueue(&urgent_later).await.unwrap();
        queue.enqueue(&routine_now).await.unwrap();

        let claimed = queue
            .dequeue(Tier::Standard, deadline(now))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, routine_now.id);
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let clock = Arc::new(ManualClock::default());
        let queue = InMemoryQueue::new(2, clock.clone());
        let now = clock.now();

        queue.enqueue(&job(Tier::Standard, 1, now)).await.unwrap();
        queue.enqueue(&job(Tier::Standard, 1, now)).await.unwrap();
        let result = queue.enqueue(&job(Tier::Standard, 1, now)).await;
        assert!(matches!(result, Err(QueueError::CapacityExceeded { .. })));

        // Other tiers are unaffected
        queue.enqueue(&job(Tier::Email, 1, now)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dequeue_is_exclusive() {
        let (queue, clock) = queue_with_clock();
        let now = clock.now();
        queue.enqueue(&job(Tier::Standard, 1, now)).await.unwrap();

        let first = queue.dequeue(Tier::Standard, deadline(now)).await.unwrap();
        let second = queue.dequeue(Tier::Standard, deadline(now)).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_retry_reschedules_with_delay() {
        let (queue, clock) = queue_with_clock();
        let now = clock.now();
        queue.enqueue(&job(Tier::Standard, 1, now)).await.unwrap();

        let mut claimed = queue
            .dequeue(Tier::Standard, deadline(now))
            .await
            .unwrap()
            .unwrap();
        claimed.prepare_retry(Duration::from_secs(10), "boom", now);
        queue.schedule_retry(&claimed).await.unwrap();

        // Not ready until the backoff elapses
        assert!(queue
            .dequeue(Tier::Standard, deadline(now))
            .await
            .unwrap()
            .is_none());
        clock.advance(Duration::from_secs(11));
        let retried = queue
            .dequeue(Tier::Standard, deadline(clock.now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retried.retries_remaining, 2);
        assert_eq!(retried.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_reclaim_requeues_within_stall_budget() {
        let (queue, clock) = queue_with_clock();
        let now = clock.now();
        queue.enqueue(&job(Tier::Standard, 1, now)).await.unwrap();

        let claimed = queue
            .dequeue(Tier::Standard, now + ChronoDuration::seconds(5))
            .await
            .unwrap()
            .unwrap();

        clock.advance(Duration::from_secs(6));
        let reclaimed = queue
            .reclaim_stalled(Tier::Standard, clock.now(), 2)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].action, ReclaimAction::Requeued);
        assert_eq!(reclaimed[0].job.id, claimed.id);
        assert_eq!(reclaimed[0].job.stalled_count, 1);

        // Requeued job is immediately claimable
        let again = queue
            .dequeue(Tier::Standard, deadline(clock.now()))
            .await
            .unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_reclaim_dead_letters_past_stall_budget() {
        let (queue, clock) = queue_with_clock();
        let now = clock.now();
        let mut stuck = job(Tier::Standard, 1, now);
        stuck.stalled_count = 2;
        queue.enqueue(&stuck).await.unwrap();

        let _ = queue
            .dequeue(Tier::Standard, now + ChronoDuration::seconds(5))
            .await
            .unwrap()
            .unwrap();

        clock.advance(Duration::from_secs(6));
        let reclaimed = queue
            .reclaim_stalled(Tier::Standard, clock.now(), 2)
            .await
            .unwrap();
        assert_eq!(reclaimed[0].action, ReclaimAction::DeadLettered);
        assert_eq!(reclaimed[0].job.stalled_count, 3);

        let stats = queue.stats(Tier::Standard, clock.now()).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test]
    async fn test_stats_counters() {
        let (queue, clock) = queue_with_clock();
        let now = clock.now();

        queue.enqueue(&job(Tier::Standard, 1, now)).await.unwrap();
        let mut delayed = job(Tier::Standard, 1, now);
        delayed.ready_at = now + ChronoDuration::minutes(5);
        queue.enqueue(&delayed).await.unwrap();

        let claimed = queue
            .dequeue(Tier::Standard, deadline(now))
            .await
            .unwrap()
            .unwrap();
        queue.complete(Tier::Standard, claimed.id).await.unwrap();

        let stats = queue.stats(Tier::Standard, now).await.unwrap();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_take_for_promotion_preserves_order_and_removes() {
        let (queue, clock) = queue_with_clock();
        let now = clock.now();

        let first = job(Tier::Standard, 1, now);
        let second = job(Tier::Standard, 2, now);
        queue.enqueue(&second).await.unwrap();
        queue.enqueue(&first).await.unwrap();

        let taken = queue.take_for_promotion(Tier::Standard, 10);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].id, first.id);
        assert_eq!(queue.depth(Tier::Standard), 0);
    }
}

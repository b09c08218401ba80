//! # Tiered Queue Manager
//!
//! The single enqueue/dequeue surface for all six tiers. Every call picks
//! a backend by consulting the connection guard: broker first, in-memory
//! fallback when the circuit is open or the broker call fails. Failover is
//! transparent to callers (an enqueue that lands in the fallback still
//! reports success) except for the Emergency tier, where a fallback
//! insertion failure is surfaced so the caller can take the direct path.
//!
//! A background promotion loop drains fallback jobs back to the broker
//! once the readiness gate reopens (best-effort, batch-bounded).

use crate::config::AegisConfig;
use crate::constants::Tier;
use crate::queue::backend::{BackendKind, QueueBackend, ReclaimAction, ReclaimedJob};
use crate::queue::broker::BrokerQueue;
use crate::queue::errors::QueueError;
use crate::queue::job::{EnqueuedJob, Job, JobOptions, JobState, TierQueueStats};
use crate::queue::memory::InMemoryQueue;
use crate::resilience::ConnectionGuard;
use crate::utils::Clock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Routes queue operations to the broker or the in-memory fallback.
#[derive(Debug)]
pub struct TieredQueueManager {
    broker: Option<Arc<BrokerQueue>>,
    fallback: Arc<InMemoryQueue>,
    guard: Arc<ConnectionGuard>,
    config: Arc<AegisConfig>,
    clock: Arc<dyn Clock>,
    /// Enqueues that landed in the fallback because the broker was
    /// unavailable.
    fallback_enqueues: AtomicU64,
    /// Jobs promoted from the fallback back to the broker.
    promoted_jobs: AtomicU64,
}

impl TieredQueueManager {
    pub fn new(
        broker: Option<Arc<BrokerQueue>>,
        fallback: Arc<InMemoryQueue>,
        guard: Arc<ConnectionGuard>,
        config: Arc<AegisConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            broker,
            fallback,
            guard,
            config,
            clock,
            fallback_enqueues: AtomicU64::new(0),
            promoted_jobs: AtomicU64::new(0),
        }
    }

    /// Enqueue a payload onto a tier's queue.
    ///
    /// Returns an error only when both backends refused the job; the
    /// caller applies the per-tier policy (Emergency escalates to the
    /// direct path, lower tiers fail soft).
    pub async fn enqueue(
        &self,
        tier: Tier,
        payload: Value,
        options: JobOptions,
    ) -> Result<EnqueuedJob, QueueError> {
        let tier_config = self.config.tiers.for_tier(tier);
        let mut job = Job::new(tier, payload, tier_config, &options, self.clock.now());
        job.status = JobState::Queued;
        let estimated_delay_ms =
            (job.ready_at - job.created_at).num_milliseconds().max(0) as u64;

        if let Some(broker) = &self.broker {
            let readiness = self.guard.is_ready();
            if readiness.ready {
                job.backend = BackendKind::Broker;
                match self
                    .guard
                    .execute(|| async { broker.enqueue(&job).await })
                    .await
                {
                    Ok(()) => {
                        return Ok(EnqueuedJob {
                            job_id: job.id,
                            queue_name: tier.queue_name(),
                            backend: BackendKind::Broker,
                            estimated_delay_ms,
                        });
                    }
                    Err(e) => {
                        warn!(
                            tier = %tier,
                            job_id = %job.id,
                            error = %QueueError::from(e),
                            "⚠️ Broker enqueue failed, falling back to memory queue"
                        );
                    }
                }
            } else {
                debug!(
                    tier = %tier,
                    reason = ?readiness.reason,
                    "Broker not ready, enqueueing to fallback"
                );
            }
        }

        job.backend = BackendKind::Memory;
        self.fallback.enqueue(&job).await.map_err(|e| {
            error!(
                tier = %tier,
                job_id = %job.id,
                error = %e,
                "🚨 Fallback enqueue failed"
            );
            e
        })?;

        self.fallback_enqueues.fetch_add(1, Ordering::Relaxed);
        crate::logging::log_queue_operation(
            "enqueue_fallback",
            &tier.queue_name(),
            "memory",
            "success",
            None,
        );
        Ok(EnqueuedJob {
            job_id: job.id,
            queue_name: tier.queue_name(),
            backend: BackendKind::Memory,
            estimated_delay_ms,
        })
    }

    /// Claim the next ready job for a tier, marking it Active.
    ///
    /// Prefers the broker when the readiness gate is open; the fallback is
    /// always drained afterwards so jobs stranded there remain dequeuable
    /// while (and after) the broker is down.
    pub async fn dequeue(&self, tier: Tier) -> Result<Option<Job>, QueueError> {
        let deadline = self.active_deadline(tier);

        if let Some(broker) = &self.broker {
            if self.guard.is_ready().ready {
                match self
                    .guard
                    .execute(|| async { broker.dequeue(tier, deadline).await })
                    .await
                {
                    Ok(Some(job)) => return Ok(Some(job)),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            tier = %tier,
                            error = %QueueError::from(e),
                            "⚠️ Broker dequeue failed, draining fallback"
                        );
                    }
                }
            }
        }

        self.fallback.dequeue(tier, deadline).await
    }

    /// Mark an Active job finished, on whichever backend holds it.
    pub async fn complete(&self, job: &Job) -> Result<(), QueueError> {
        match job.backend {
            BackendKind::Broker => {
                let broker = self.broker_or_err()?;
                self.guard
                    .execute(|| async { broker.complete(job.tier, job.id).await })
                    .await
                    .map_err(QueueError::from)
            }
            BackendKind::Memory => self.fallback.complete(job.tier, job.id).await,
        }
    }

    /// Reschedule a failed job whose retry fields were already updated.
    pub async fn schedule_retry(&self, job: &Job) -> Result<(), QueueError> {
        match job.backend {
            BackendKind::Broker => {
                let broker = self.broker_or_err()?;
                self.guard
                    .execute(|| async { broker.schedule_retry(job).await })
                    .await
                    .map_err(QueueError::from)
            }
            BackendKind::Memory => self.fallback.schedule_retry(job).await,
        }
    }

    /// Permanently fail an Active job (dead-letter).
    pub async fn fail(&self, job: &Job, error: &str) -> Result<(), QueueError> {
        match job.backend {
            BackendKind::Broker => {
                let broker = self.broker_or_err()?;
                self.guard
                    .execute(|| async { broker.fail(job.tier, job.id, error).await })
                    .await
                    .map_err(QueueError::from)
            }
            BackendKind::Memory => self.fallback.fail(job.tier, job.id, error).await,
        }
    }

    /// Requeue a job whose handler exceeded the processing budget.
    ///
    /// Stalls are bounded separately from retries: exceeding the tier's
    /// `max_stalled_count` dead-letters the job outright, because repeated
    /// stalls indicate a handler or infrastructure problem rather than a
    /// transient error.
    pub async fn requeue_stalled(&self, job: &mut Job) -> Result<ReclaimAction, QueueError> {
        job.prepare_stalled_requeue(self.clock.now());
        let max_stalled = self.config.tiers.for_tier(job.tier).max_stalled_count;

        if job.stalled_count > max_stalled {
            self.fail(job, "stalled past budget").await?;
            job.status = JobState::DeadLettered;
            Ok(ReclaimAction::DeadLettered)
        } else {
            let mut requeued = job.clone();
            requeued.status = JobState::Queued;
            self.schedule_retry(&requeued).await?;
            Ok(ReclaimAction::Requeued)
        }
    }

    /// Reclaim jobs abandoned past their Active deadline on both backends.
    pub async fn reclaim_stalled(&self, tier: Tier) -> Result<Vec<ReclaimedJob>, QueueError> {
        let now = self.clock.now();
        let max_stalled = self.config.tiers.for_tier(tier).max_stalled_count;

        let mut reclaimed = self
            .fallback
            .reclaim_stalled(tier, now, max_stalled)
            .await?;

        if let Some(broker) = &self.broker {
            if self.guard.is_ready().ready {
                match self
                    .guard
                    .execute(|| async { broker.reclaim_stalled(tier, now, max_stalled).await })
                    .await
                {
                    Ok(mut broker_reclaimed) => reclaimed.append(&mut broker_reclaimed),
                    Err(e) => warn!(
                        tier = %tier,
                        error = %QueueError::from(e),
                        "⚠️ Broker stall reclaim failed"
                    ),
                }
            }
        }
        Ok(reclaimed)
    }

    /// Per-tier counters merged across both backends.
    pub async fn queue_stats(&self) -> HashMap<Tier, TierQueueStats> {
        let now = self.clock.now();
        let mut stats = HashMap::new();
        let broker_ready =
            self.broker.is_some() && self.guard.is_ready().ready;

        for tier in Tier::ALL {
            let mut tier_stats = self
                .fallback
                .stats(tier, now)
                .await
                .unwrap_or_default();

            if broker_ready {
                if let Some(broker) = &self.broker {
                    match self
                        .guard
                        .execute(|| async { broker.stats(tier, now).await })
                        .await
                    {
                        Ok(broker_stats) => tier_stats = tier_stats.merge(broker_stats),
                        Err(e) => debug!(
                            tier = %tier,
                            error = %QueueError::from(e),
                            "Broker stats unavailable"
                        ),
                    }
                }
            }
            stats.insert(tier, tier_stats);
        }
        stats
    }

    /// Enqueues that were served by the fallback queue.
    pub fn fallback_enqueue_count(&self) -> u64 {
        self.fallback_enqueues.load(Ordering::Relaxed)
    }

    /// Jobs promoted from the fallback back to the broker.
    pub fn promoted_job_count(&self) -> u64 {
        self.promoted_jobs.load(Ordering::Relaxed)
    }

    pub fn fallback_depth(&self, tier: Tier) -> usize {
        self.fallback.depth(tier)
    }

    pub fn guard(&self) -> &Arc<ConnectionGuard> {
        &self.guard
    }

    /// One best-effort promotion pass: move fallback jobs to the broker,
    /// stopping at the first failure. Returns the number promoted.
    pub async fn promote_fallback_jobs(&self) -> usize {
        let Some(broker) = &self.broker else { return 0 };

        // The promotion cadence doubles as the pool-utilization sampling
        // point for the readiness gate
        self.guard.set_pool_utilization(broker.pool_utilization());

        if !self.guard.is_ready().ready {
            return 0;
        }

        let batch_size = self.config.queue.promotion_batch_size;
        let mut promoted = 0usize;

        for tier in Tier::ALL {
            let batch = self.fallback.take_for_promotion(tier, batch_size);
            if batch.is_empty() {
                continue;
            }

            let mut failed_from = None;
            for (index, job) in batch.iter().enumerate() {
                let mut promotable = job.clone();
                promotable.backend = BackendKind::Broker;
                promotable.status = JobState::Queued;

                let result = self
                    .guard
                    .execute(|| async { broker.enqueue(&promotable).await })
                    .await;
                match result {
                    Ok(()) => promoted += 1,
                    Err(e) => {
                        warn!(
                            tier = %tier,
                            error = %QueueError::from(e),
                            "⚠️ Promotion pass interrupted, returning jobs to fallback"
                        );
                        failed_from = Some(index);
                        break;
                    }
                }
            }

            if let Some(index) = failed_from {
                for job in &batch[index..] {
                    if let Err(e) = self.fallback.enqueue(job).await {
                        error!(
                            tier = %tier,
                            job_id = %job.id,
                            error = %e,
                            "🚨 Failed to return job to fallback during promotion"
                        );
                    }
                }
                break;
            }
        }

        if promoted > 0 {
            self.promoted_jobs
                .fetch_add(promoted as u64, Ordering::Relaxed);
            info!(promoted = promoted, "📦 Promoted fallback jobs to broker");
        }
        promoted
    }

    /// Spawn the background promotion loop. Exits when `shutdown` flips.
    pub fn spawn_promotion_loop(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = manager.config.queue.promotion_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.promote_fallback_jobs().await;
                    }
                    _ = shutdown.changed() => {
                        debug!("Promotion loop shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn active_deadline(&self, tier: Tier) -> DateTime<Utc> {
        let tier_config = self.config.tiers.for_tier(tier);
        // Budget plus the reaper interval as grace, so the worker's own
        // inline timeout normally wins and the reaper only catches
        // crashed workers.
        let grace_ms = tier_config.max_processing_time_ms + tier_config.stalled_check_interval_ms;
        self.clock.now() + ChronoDuration::milliseconds(grace_ms as i64)
    }

    fn broker_or_err(&self) -> Result<&Arc<BrokerQueue>, QueueError> {
        self.broker.as_ref().ok_or(QueueError::BrokerUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use serde_json::json;

    fn manager() -> (Arc<TieredQueueManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = Arc::new(AegisConfig::default());
        let guard = Arc::new(ConnectionGuard::new(&config, clock.clone()));
        let fallback = Arc::new(InMemoryQueue::new(
            config.queue.memory_max_depth,
            clock.clone(),
        ));
        (
            Arc::new(TieredQueueManager::new(
                None,
                fallback,
                guard,
                config,
                clock.clone(),
            )),
            clock,
        )
    }

    #[tokio::test]
    async fn test_enqueue_without_broker_uses_fallback() {
        let (manager, _clock) = manager();
        let enqueued = manager
            .enqueue(Tier::Standard, json!({"n": 1}), JobOptions::default())
            .await
            .unwrap();
        assert_eq!(enqueued.backend, BackendKind::Memory);
        assert_eq!(enqueued.queue_name, "aegis_standard");
        assert_eq!(manager.fallback_enqueue_count(), 1);
    }

    #[tokio::test]
    async fn test_dequeue_round_trip() {
        let (manager, _clock) = manager();
        let enqueued = manager
            .enqueue(Tier::Standard, json!({"n": 1}), JobOptions::default())
            .await
            .unwrap();

        let job = manager.dequeue(Tier::Standard).await.unwrap().unwrap();
        assert_eq!(job.id, enqueued.job_id);
        assert_eq!(job.status, JobState::Active);

        manager.complete(&job).await.unwrap();
        let stats = manager.queue_stats().await;
        assert_eq!(stats[&Tier::Standard].completed, 1);
    }

    #[tokio::test]
    async fn test_priority_ordering_preserved_in_fallback_mode() {
        let (manager, _clock) = manager();
        for priority in [3, 1, 2, 1] {
            manager
                .enqueue(
                    Tier::Standard,
                    json!({"p": priority}),
                    JobOptions::default().with_priority(priority),
                )
                .await
                .unwrap();
        }

        let mut order = Vec::new();
        while let Some(job) = manager.dequeue(Tier::Standard).await.unwrap() {
            order.push(job.payload["p"].as_i64().unwrap());
            manager.complete(&job).await.unwrap();
        }
        assert_eq!(order, vec![1, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_requeue_stalled_bounded() {
        let (manager, _clock) = manager();
        manager
            .enqueue(Tier::Background, json!({}), JobOptions::default())
            .await
            .unwrap();

        // Background tier allows max_stalled_count = 1
        let mut job = manager.dequeue(Tier::Background).await.unwrap().unwrap();
        let action = manager.requeue_stalled(&mut job).await.unwrap();
        assert_eq!(action, ReclaimAction::Requeued);

        let mut job = manager.dequeue(Tier::Background).await.unwrap().unwrap();
        assert_eq!(job.stalled_count, 1);
        let action = manager.requeue_stalled(&mut job).await.unwrap();
        assert_eq!(action, ReclaimAction::DeadLettered);

        let stats = manager.queue_stats().await;
        assert_eq!(stats[&Tier::Background].failed, 1);
    }

    #[tokio::test]
    async fn test_promotion_without_broker_is_noop() {
        let (manager, _clock) = manager();
        manager
            .enqueue(Tier::Standard, json!({}), JobOptions::default())
            .await
            .unwrap();
        assert_eq!(manager.promote_fallback_jobs().await, 0);
        assert_eq!(manager.fallback_depth(Tier::Standard), 1);
    }
}

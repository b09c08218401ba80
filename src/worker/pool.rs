//! # Per-Tier Worker Pools
//!
//! Each tier runs an independently sized pool of worker loops plus one
//! stalled-job reaper. A worker loop: consult the readiness gate →
//! dequeue the next ready job in priority order → run the handler under
//! the tier's time budget → complete, retry with backoff, or dead-letter.
//! The reaper reclaims jobs left Active past their deadline by a worker
//! that died mid-job.
//!
//! Shutdown is cooperative: a watch signal stops the loops after their
//! in-flight job finishes.

use crate::config::{AegisConfig, TierConfig};
use crate::constants::Tier;
use crate::queue::{Job, ReclaimAction, TieredQueueManager};
use crate::utils::Clock;
use crate::worker::dead_letter::DeadLetterStore;
use crate::worker::handler::HandlerRegistry;
use crate::worker::retry::compute_backoff;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One tier's pool of workers and its reaper.
#[derive(Debug)]
pub struct WorkerPool {
    tier: Tier,
    manager: Arc<TieredQueueManager>,
    registry: Arc<HandlerRegistry>,
    dead_letters: Arc<DeadLetterStore>,
    config: Arc<AegisConfig>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    pub fn new(
        tier: Tier,
        manager: Arc<TieredQueueManager>,
        registry: Arc<HandlerRegistry>,
        dead_letters: Arc<DeadLetterStore>,
        config: Arc<AegisConfig>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tier,
            manager,
            registry,
            dead_letters,
            config,
            clock,
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Spawn this tier's worker loops and reaper.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let tier_config = self.config.tiers.for_tier(self.tier).clone();
        let mut handles = Vec::with_capacity(tier_config.worker_concurrency + 1);

        for worker_index in 0..tier_config.worker_concurrency {
            handles.push(tokio::spawn(Self::worker_loop(
                Arc::clone(self),
                worker_index,
                tier_config.clone(),
                shutdown.clone(),
            )));
        }
        handles.push(tokio::spawn(Self::reaper_loop(
            Arc::clone(self),
            tier_config,
            shutdown,
        )));

        info!(
            tier = %self.tier,
            workers = handles.len() - 1,
            "👷 Worker pool started"
        );
        handles
    }

    async fn worker_loop(
        pool: Arc<Self>,
        worker_index: usize,
        tier_config: TierConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(tier = %pool.tier, worker = worker_index, "Worker loop started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            // Fast-fail gate: while the store is refused and the fallback
            // is empty there is nothing a dequeue could return
            let readiness = pool.manager.guard().is_ready();
            if !readiness.ready && pool.manager.fallback_depth(pool.tier) == 0 {
                if idle_wait(&mut shutdown, tier_config.poll_interval()).await {
                    break;
                }
                continue;
            }

            match pool.manager.dequeue(pool.tier).await {
                Ok(Some(job)) => pool.process_job(job, &tier_config).await,
                Ok(None) => {
                    if idle_wait(&mut shutdown, tier_config.poll_interval()).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(tier = %pool.tier, error = %e, "Dequeue failed, backing off");
                    if idle_wait(&mut shutdown, tier_config.poll_interval()).await {
                        break;
                    }
                }
            }
        }
        debug!(tier = %pool.tier, worker = worker_index, "Worker loop stopped");
    }

    /// Run one job to a terminal decision: completed, rescheduled, or
    /// dead-lettered.
    async fn process_job(&self, job: Job, tier_config: &TierConfig) {
        let Some(handler) = self.registry.get(self.tier) else {
            // Consume the retry budget so a permanently missing handler
            // still terminates in the dead-letter store
            self.handle_failure(job, "no handler registered for tier".to_string())
                .await;
            return;
        };

        crate::logging::log_job_operation("process", self.tier, Some(job.id), "started", None);

        match tokio::time::timeout(tier_config.max_processing_time(), handler.handle(&job)).await {
            Ok(Ok(_result)) => {
                if let Err(e) = self.manager.complete(&job).await {
                    error!(tier = %self.tier, job_id = %job.id, error = %e, "Completion bookkeeping failed");
                }
                crate::logging::log_job_operation(
                    "process",
                    self.tier,
                    Some(job.id),
                    "completed",
                    None,
                );
            }
            Ok(Err(err)) => self.handle_failure(job, err.to_string()).await,
            Err(_elapsed) => self.handle_stall(job).await,
        }
    }

    /// Handler returned an error: retry with backoff while budget remains,
    /// else dead-letter.
    async fn handle_failure(&self, mut job: Job, error: String) {
        let tier_config = self.config.tiers.for_tier(self.tier);

        if job.retries_remaining > 0 {
            let backoff = compute_backoff(&tier_config.backoff, job.attempts_made());
            job.prepare_retry(backoff, &error, self.clock.now());

            match self.manager.schedule_retry(&job).await {
                Ok(()) => debug!(
                    tier = %self.tier,
                    job_id = %job.id,
                    retries_remaining = job.retries_remaining,
                    backoff_ms = backoff.as_millis() as u64,
                    "🔁 Job rescheduled after failure"
                ),
                Err(e) => error!(
                    tier = %self.tier,
                    job_id = %job.id,
                    error = %e,
                    "Failed to reschedule job"
                ),
            }
        } else {
            if let Err(e) = self.manager.fail(&job, &error).await {
                error!(tier = %self.tier, job_id = %job.id, error = %e, "Failed to mark job dead-lettered");
            }
            self.dead_letters.record(&job, &error, self.clock.now()).await;
        }
    }

    /// Handler exceeded the tier's time budget. Stalls are bounded
    /// separately from retries: they indicate handler or infrastructure
    /// problems, not transient errors.
    async fn handle_stall(&self, mut job: Job) {
        warn!(
            tier = %self.tier,
            job_id = %job.id,
            stalled_count = job.stalled_count + 1,
            "⏱️ Job exceeded processing budget"
        );

        match self.manager.requeue_stalled(&mut job).await {
            Ok(ReclaimAction::Requeued) => {}
            Ok(ReclaimAction::DeadLettered) => {
                self.dead_letters
                    .record(&job, "exceeded processing budget", self.clock.now())
                    .await;
            }
            Err(e) => error!(
                tier = %self.tier,
                job_id = %job.id,
                error = %e,
                "Failed to requeue stalled job"
            ),
        }
    }

    /// Periodically reclaim jobs abandoned by a crashed worker.
    async fn reaper_loop(
        pool: Arc<Self>,
        tier_config: TierConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(tier_config.stalled_check_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match pool.manager.reclaim_stalled(pool.tier).await {
                        Ok(reclaimed) => {
                            for entry in reclaimed {
                                if entry.action == ReclaimAction::DeadLettered {
                                    pool.dead_letters
                                        .record(&entry.job, "abandoned past deadline", pool.clock.now())
                                        .await;
                                } else {
                                    warn!(
                                        tier = %pool.tier,
                                        job_id = %entry.job.id,
                                        stalled_count = entry.job.stalled_count,
                                        "♻️ Stalled job reclaimed and requeued"
                                    );
                                }
                            }
                        }
                        Err(e) => warn!(tier = %pool.tier, error = %e, "Stall reclaim pass failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(tier = %pool.tier, "Reaper stopped");
    }
}

/// Sleep for `interval` unless shutdown fires first; returns `true` on
/// shutdown.
async fn idle_wait(shutdown: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = shutdown.changed() => true,
    }
}

/// All six tier pools plus the promotion loop, under one shutdown signal.
#[derive(Debug)]
pub struct WorkerPoolDispatcher {
    pools: Vec<Arc<WorkerPool>>,
    manager: Arc<TieredQueueManager>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl WorkerPoolDispatcher {
    pub fn new(
        manager: Arc<TieredQueueManager>,
        registry: Arc<HandlerRegistry>,
        dead_letters: Arc<DeadLetterStore>,
        config: Arc<AegisConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pools = Tier::ALL
            .iter()
            .map(|tier| {
                WorkerPool::new(
                    *tier,
                    Arc::clone(&manager),
                    Arc::clone(&registry),
                    Arc::clone(&dead_letters),
                    Arc::clone(&config),
                    Arc::clone(&clock),
                )
            })
            .collect();

        Self {
            pools,
            manager,
            shutdown_tx,
            shutdown_rx,
            handles: parking_lot::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Start every tier pool and the fallback promotion loop.
    pub fn start(&self) -> crate::error::Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(crate::error::AegisError::ConfigurationError(
                "worker pools already started".to_string(),
            ));
        }

        let mut handles = self.handles.lock();
        for pool in &self.pools {
            handles.extend(pool.spawn(self.shutdown_rx.clone()));
        }
        handles.push(self.manager.spawn_promotion_loop(self.shutdown_rx.clone()));

        info!(pools = self.pools.len(), "🚀 Worker pool dispatcher started");
        Ok(())
    }

    /// Stop all loops, waiting up to `timeout` for in-flight jobs.
    pub async fn shutdown(&self, timeout: Duration) -> crate::error::Result<()> {
        if !self.started.load(Ordering::Acquire) {
            return Ok(());
        }

        info!("🛑 Worker pool dispatcher shutting down");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        let joined = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;

        if joined.is_err() {
            warn!("Shutdown timeout elapsed with workers still running");
        }
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    /// Configured worker concurrency per tier.
    pub fn worker_counts(&self) -> HashMap<Tier, usize> {
        self.pools
            .iter()
            .map(|pool| {
                (
                    pool.tier(),
                    pool.config.tiers.for_tier(pool.tier()).worker_concurrency,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryQueue, JobOptions};
    use crate::resilience::ConnectionGuard;
    use crate::utils::SystemClock;
    use crate::worker::handler::JobHandler;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        processed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: &Job) -> anyhow::Result<Value> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"ok": true}))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn handle(&self, _job: &Job) -> anyhow::Result<Value> {
            anyhow::bail!("always fails")
        }
    }

    fn fixture() -> (
        Arc<TieredQueueManager>,
        Arc<HandlerRegistry>,
        Arc<DeadLetterStore>,
        Arc<AegisConfig>,
        Arc<SystemClock>,
    ) {
        let clock = Arc::new(SystemClock);
        let mut config = AegisConfig::default();
        // Tight timings so the tests run in milliseconds
        config.tiers.standard.poll_interval_ms = 10;
        config.tiers.standard.backoff = crate::config::BackoffConfig::fixed(10);
        config.tiers.standard.max_retries = 2;
        let config = Arc::new(config);
        let guard = Arc::new(ConnectionGuard::new(&config, clock.clone()));
        let fallback = Arc::new(InMemoryQueue::new(1_000, clock.clone()));
        let manager = Arc::new(TieredQueueManager::new(
            None,
            fallback,
            guard,
            Arc::clone(&config),
            clock.clone(),
        ));
        let registry = Arc::new(HandlerRegistry::new());
        let dead_letters = Arc::new(DeadLetterStore::new(None));
        (manager, registry, dead_letters, config, clock)
    }

    #[tokio::test]
    async fn test_pool_processes_jobs() {
        let (manager, registry, dead_letters, config, clock) = fixture();
        let processed = Arc::new(AtomicUsize::new(0));
        registry.register(
            Tier::Standard,
            Arc::new(CountingHandler {
                processed: processed.clone(),
            }),
        );

        let dispatcher = WorkerPoolDispatcher::new(
            Arc::clone(&manager),
            registry,
            dead_letters,
            config,
            clock,
        );
        dispatcher.start().unwrap();

        for n in 0..5 {
            manager
                .enqueue(Tier::Standard, json!({"n": n}), JobOptions::default())
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while processed.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("jobs should all process");

        dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();

        let stats = manager.queue_stats().await;
        assert_eq!(stats[&Tier::Standard].completed, 5);
    }

    #[tokio::test]
    async fn test_failing_handler_exhausts_retries_then_dead_letters() {
        let (manager, registry, dead_letters, config, clock) = fixture();
        registry.register(Tier::Standard, Arc::new(FailingHandler));

        let dispatcher = WorkerPoolDispatcher::new(
            Arc::clone(&manager),
            registry,
            Arc::clone(&dead_letters),
            config,
            clock,
        );
        dispatcher.start().unwrap();

        let enqueued = manager
            .enqueue(Tier::Standard, json!({"doomed": true}), JobOptions::default())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while dead_letters.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job should dead-letter");

        dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();

        let record = dead_letters.get(enqueued.job_id).unwrap();
        // max_retries = 2 in this fixture
        assert_eq!(record.attempts_made, 2);
        assert!(record.error.contains("always fails"));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (manager, registry, dead_letters, config, clock) = fixture();
        let dispatcher =
            WorkerPoolDispatcher::new(manager, registry, dead_letters, config, clock);
        dispatcher.start().unwrap();
        assert!(dispatcher.start().is_err());
        dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();
    }
}

//! # Core Wiring
//!
//! Explicit construction of the whole subsystem at process start. Every
//! component is built here and handed its dependencies. There are no
//! module-level singletons, and swapping a collaborator (persistence,
//! notifier, clock) is a constructor argument, not a patch.

use crate::config::AegisConfig;
use crate::constants::Tier;
use crate::error::{AegisError, Result};
use crate::processing::emergency::EmergencyProcessor;
use crate::processing::report_processor::ReportProcessor;
use crate::queue::{BrokerQueue, InMemoryQueue, TierQueueStats, TieredQueueManager};
use crate::resilience::{ConnectionGuard, ConnectionHealth};
use crate::services::{InMemoryPersistence, LogNotifier, Notifier, PersistenceStore};
use crate::utils::{Clock, SystemClock};
use crate::worker::{DeadLetterStore, HandlerRegistry, JobHandler, WorkerPoolDispatcher};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The assembled processing core: queues, pools, resilience layer, and
/// the report processor, wired once and shared.
#[derive(Debug)]
pub struct AegisCore {
    config: Arc<AegisConfig>,
    registry: Arc<HandlerRegistry>,
    dead_letters: Arc<DeadLetterStore>,
    manager: Arc<TieredQueueManager>,
    dispatcher: WorkerPoolDispatcher,
    processor: ReportProcessor,
}

impl AegisCore {
    /// Full dependency-injected construction.
    pub fn with_components(
        config: AegisConfig,
        broker: Option<Arc<BrokerQueue>>,
        persistence: Arc<dyn PersistenceStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let guard = Arc::new(ConnectionGuard::new(&config, Arc::clone(&clock)));
        let fallback = Arc::new(InMemoryQueue::new(
            config.queue.memory_max_depth,
            Arc::clone(&clock),
        ));
        let manager = Arc::new(TieredQueueManager::new(
            broker,
            fallback,
            guard,
            Arc::clone(&config),
            Arc::clone(&clock),
        ));
        let registry = Arc::new(HandlerRegistry::new());
        let dead_letters = Arc::new(DeadLetterStore::new(Some(Arc::clone(&persistence))));

        let dispatcher = WorkerPoolDispatcher::new(
            Arc::clone(&manager),
            Arc::clone(&registry),
            Arc::clone(&dead_letters),
            Arc::clone(&config),
            Arc::clone(&clock),
        );

        let emergency = EmergencyProcessor::new(
            Arc::clone(&registry),
            Arc::clone(&manager),
            Arc::clone(&persistence),
            Arc::clone(&notifier),
            Arc::clone(&config),
            Arc::clone(&clock),
        );

        let processor = ReportProcessor::new(
            &config,
            Arc::clone(&manager),
            emergency,
            persistence,
            notifier,
            clock,
        );

        Self {
            config,
            registry,
            dead_letters,
            manager,
            dispatcher,
            processor,
        }
    }

    /// Broker-less core with in-memory persistence: tests and local
    /// development.
    pub fn in_memory(config: AegisConfig) -> Self {
        Self::with_components(
            config,
            None,
            Arc::new(InMemoryPersistence::new()),
            Arc::new(LogNotifier),
            Arc::new(SystemClock),
        )
    }

    /// Production construction: connect the broker from
    /// `config.database.url` and wire the given collaborators.
    pub async fn connect(
        config: AegisConfig,
        persistence: Arc<dyn PersistenceStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let url = config.database.url.clone().ok_or_else(|| {
            AegisError::ConfigurationError("database.url is required to connect".to_string())
        })?;

        let broker = BrokerQueue::connect(&url, &config.database)
            .await
            .map_err(|e| AegisError::DatabaseError(e.to_string()))?;

        Ok(Self::with_components(
            config,
            Some(Arc::new(broker)),
            persistence,
            notifier,
            Arc::new(SystemClock),
        ))
    }

    /// Start the worker pools and background loops.
    pub async fn start(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(AegisError::ConfigurationError)?;
        self.dispatcher.start()?;
        info!("✅ Aegis core started");
        Ok(())
    }

    /// Graceful shutdown, waiting up to `timeout` for in-flight jobs.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.dispatcher.shutdown(timeout).await
    }

    /// Register the handler executed for a tier's jobs.
    pub fn register_handler(&self, tier: Tier, handler: Arc<dyn JobHandler>) {
        self.registry.register(tier, handler);
    }

    pub fn processor(&self) -> &ReportProcessor {
        &self.processor
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterStore> {
        &self.dead_letters
    }

    pub fn config(&self) -> &AegisConfig {
        &self.config
    }

    /// Per-tier queue counters across both backends.
    pub async fn queue_stats(&self) -> HashMap<Tier, TierQueueStats> {
        self.manager.queue_stats().await
    }

    /// Circuit state, health score, and pool utilization.
    pub fn health_status(&self) -> ConnectionHealth {
        self.manager.guard().health_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_core_starts_and_stops() {
        let core = AegisCore::in_memory(AegisConfig::default());
        core.start().await.unwrap();
        let health = core.health_status();
        assert_eq!(health.health_score, 100);
        core.shutdown(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_start() {
        let mut config = AegisConfig::default();
        config.tiers.standard.worker_concurrency = 0;
        let core = AegisCore::in_memory(config);
        assert!(core.start().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_requires_database_url() {
        let result = AegisCore::connect(
            AegisConfig::default(),
            Arc::new(InMemoryPersistence::new()),
            Arc::new(LogNotifier),
        )
        .await;
        assert!(matches!(result, Err(AegisError::ConfigurationError(_))));
    }
}

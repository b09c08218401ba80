//! # Job Handlers
//!
//! The execution seam: one handler per tier, registered at wiring time.
//! Handlers must be idempotent: the queue layer guarantees at most one
//! concurrent execution per job id, but delivery is at-least-once, and a
//! job reclaimed after a stall re-runs with whatever side effects the
//! interrupted attempt already committed.

use crate::constants::Tier;
use crate::queue::Job;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// A unit of business logic executed by the worker pools.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one job. An `Err` triggers the tier's retry policy; the
    /// returned value is recorded for auditing only.
    async fn handle(&self, job: &Job) -> anyhow::Result<Value>;

    /// Handler name for logging.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Tier-keyed handler registry, shared by the dispatcher and the
/// emergency direct path.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<Tier, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a tier, replacing any previous one.
    pub fn register(&self, tier: Tier, handler: Arc<dyn JobHandler>) {
        info!(tier = %tier, handler = handler.name(), "📚 Handler registered");
        self.handlers.insert(tier, handler);
    }

    pub fn get(&self, tier: Tier) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&tier).map(|entry| Arc::clone(entry.value()))
    }

    pub fn registered_tiers(&self) -> Vec<Tier> {
        self.handlers.iter().map(|entry| *entry.key()).collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered_tiers", &self.registered_tiers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl JobHandler for EchoHandler {
        async fn handle(&self, job: &Job) -> anyhow::Result<Value> {
            Ok(job.payload.clone())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = HandlerRegistry::new();
        assert!(registry.get(Tier::Standard).is_none());

        registry.register(Tier::Standard, Arc::new(EchoHandler));
        let handler = registry.get(Tier::Standard).unwrap();
        assert_eq!(handler.name(), "echo");
        assert_eq!(registry.registered_tiers(), vec![Tier::Standard]);
    }

    #[tokio::test]
    async fn test_handler_executes() {
        let registry = HandlerRegistry::new();
        registry.register(Tier::Standard, Arc::new(EchoHandler));

        let settings = crate::config::TierSettings::default();
        let job = Job::new(
            Tier::Standard,
            json!({"echo": true}),
            settings.for_tier(Tier::Standard),
            &crate::queue::JobOptions::default(),
            chrono::Utc::now(),
        );

        let handler = registry.get(Tier::Standard).unwrap();
        let result = handler.handle(&job).await.unwrap();
        assert_eq!(result, json!({"echo": true}));
    }
}

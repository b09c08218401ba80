//! # Connection Guard
//!
//! The single process-wide mediator for backing-store access. Pairs the
//! circuit breaker with the health monitor and exposes the readiness gate
//! that the queue manager and worker pools consult before any
//! store-dependent work, enabling fast-fail instead of cascading timeouts
//! under load.

use crate::config::AegisConfig;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerMetrics, CircuitState, ConnectionHealth,
    HealthMonitor,
};
use crate::utils::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Why the readiness gate refused store-dependent work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ReadinessReason {
    CircuitOpen,
    LowHealthScore { score: u32, minimum: u32 },
    PoolSaturated { utilization: f64, maximum: f64 },
}

impl fmt::Display for ReadinessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessReason::CircuitOpen => write!(f, "circuit breaker open"),
            ReadinessReason::LowHealthScore { score, minimum } => {
                write!(f, "health score {score} below minimum {minimum}")
            }
            ReadinessReason::PoolSaturated {
                utilization,
                maximum,
            } => write!(f, "pool utilization {utilization:.2} above maximum {maximum:.2}"),
        }
    }
}

/// Result of the readiness gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    pub reason: Option<ReadinessReason>,
}

impl Readiness {
    fn ready() -> Self {
        Self {
            ready: true,
            reason: None,
        }
    }

    fn refused(reason: ReadinessReason) -> Self {
        Self {
            ready: false,
            reason: Some(reason),
        }
    }
}

/// Guards all operations against the shared backing store.
///
/// One instance is constructed at process start and shared by every
/// component, so circuit and health state are globally consistent without
/// a lock.
#[derive(Debug)]
pub struct ConnectionGuard {
    breaker: CircuitBreaker,
    health: HealthMonitor,
}

impl ConnectionGuard {
    pub fn new(config: &AegisConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breaker: CircuitBreaker::new(
                "backing_store".to_string(),
                config.circuit_breaker.clone(),
                clock.clone(),
            ),
            health: HealthMonitor::new(config.health.clone(), clock),
        }
    }

    /// Execute a store operation under circuit protection, recording the
    /// outcome into the health score.
    pub async fn execute<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = self.breaker.call(operation).await;
        match &result {
            Ok(_) => self.health.record_success(),
            Err(CircuitBreakerError::OperationFailed(_)) => self.health.record_failure(),
            // Rejected without a real attempt: health signal unchanged
            Err(CircuitBreakerError::CircuitOpen { .. }) => {}
        }
        result
    }

    /// The readiness gate: circuit state, health score threshold, and
    /// pool-utilization threshold combined.
    pub fn is_ready(&self) -> Readiness {
        if self.breaker.state() == CircuitState::Open {
            return Readiness::refused(ReadinessReason::CircuitOpen);
        }
        if !self.health.is_score_healthy() {
            return Readiness::refused(ReadinessReason::LowHealthScore {
                score: self.health.health_score(),
                minimum: self.health.config().min_healthy_score,
            });
        }
        if !self.health.is_pool_available() {
            return Readiness::refused(ReadinessReason::PoolSaturated {
                utilization: self.health.pool_utilization(),
                maximum: self.health.config().max_pool_utilization,
            });
        }
        Readiness::ready()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn health_status(&self) -> ConnectionHealth {
        self.health.snapshot(self.breaker.state())
    }

    pub fn breaker_metrics(&self) -> CircuitBreakerMetrics {
        self.breaker.metrics()
    }

    pub fn set_pool_utilization(&self, utilization: f64) {
        self.health.set_pool_utilization(utilization);
    }

    /// Force the circuit open (operator emergency stop).
    pub fn force_open(&self) {
        self.breaker.force_open();
    }

    /// Force the circuit closed (operator emergency recovery).
    pub fn force_closed(&self) {
        self.breaker.force_closed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;
    use std::time::Duration;

    fn guard_with_clock() -> (ConnectionGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let mut config = AegisConfig::default();
        config.circuit_breaker.failure_threshold = 2;
        config.circuit_breaker.open_timeout_ms = 1_000;
        (ConnectionGuard::new(&config, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_ready_when_fresh() {
        let (guard, _clock) = guard_with_clock();
        let readiness = guard.is_ready();
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
    }

    #[tokio::test]
    async fn test_not_ready_when_circuit_open() {
        let (guard, _clock) = guard_with_clock();

        for _ in 0..2 {
            let _ = guard
                .execute(|| async { Err::<(), _>("store down") })
                .await;
        }

        let readiness = guard.is_ready();
        assert!(!readiness.ready);
        assert_eq!(readiness.reason, Some(ReadinessReason::CircuitOpen));
    }

    #[tokio::test]
    async fn test_health_recorded_only_for_real_attempts() {
        let (guard, _clock) = guard_with_clock();

        for _ in 0..2 {
            let _ = guard
                .execute(|| async { Err::<(), _>("store down") })
                .await;
        }
        let score_after_failures = guard.health_status().health_score;

        // Circuit now open: rejected calls must not move the score
        let _ = guard.execute(|| async { Ok::<_, String>(()) }).await;
        assert_eq!(guard.health_status().health_score, score_after_failures);
    }

    #[tokio::test]
    async fn test_recovery_restores_readiness() {
        let (guard, clock) = guard_with_clock();

        for _ in 0..2 {
            let _ = guard
                .execute(|| async { Err::<(), _>("store down") })
                .await;
        }
        assert!(!guard.is_ready().ready);

        clock.advance(Duration::from_millis(1_100));
        let result = guard.execute(|| async { Ok::<_, String>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(guard.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_not_ready_when_pool_saturated() {
        let (guard, _clock) = guard_with_clock();
        guard.set_pool_utilization(0.95);
        let readiness = guard.is_ready();
        assert!(!readiness.ready);
        assert!(matches!(
            readiness.reason,
            Some(ReadinessReason::PoolSaturated { .. })
        ));
    }

    #[tokio::test]
    async fn test_not_ready_when_health_low() {
        let clock = Arc::new(ManualClock::default());
        let mut config = AegisConfig::default();
        // High threshold so the circuit stays closed while health drains
        config.circuit_breaker.failure_threshold = 100;
        let guard = ConnectionGuard::new(&config, clock);

        for _ in 0..6 {
            let _ = guard
                .execute(|| async { Err::<(), _>("store degraded") })
                .await;
        }

        let readiness = guard.is_ready();
        assert!(!readiness.ready);
        assert!(matches!(
            readiness.reason,
            Some(ReadinessReason::LowHealthScore { .. })
        ));
    }
}

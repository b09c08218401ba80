//! # Connection Health Scoring
//!
//! A smoothly-varying 0-100 reliability signal for the backing store,
//! separate from the circuit state. Successes raise the score by a fixed
//! increment; failures lower it by an amount that grows with the
//! consecutive-failure count, so sustained failure is penalized more than
//! isolated blips.

use crate::config::HealthConfig;
use crate::resilience::CircuitState;
use crate::utils::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Process-wide connection health snapshot, rebuilt fresh on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub health_score: u32,
    pub pool_utilization: f64,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Tracks the health score and pool utilization for the backing store.
#[derive(Debug)]
pub struct HealthMonitor {
    /// Health score in [0, 100]; starts at full health
    score: AtomicU32,
    consecutive_failures: AtomicU32,
    /// Pool utilization in [0.0, 1.0], stored as f32 bits
    pool_utilization: AtomicU32,
    last_success_at: Mutex<Option<DateTime<Utc>>>,
    config: HealthConfig,
    clock: Arc<dyn Clock>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            score: AtomicU32::new(100),
            consecutive_failures: AtomicU32::new(0),
            pool_utilization: AtomicU32::new(0f32.to_bits()),
            last_success_at: Mutex::new(None),
            config,
            clock,
        }
    }

    /// Record a successful store operation.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        *self.last_success_at.lock() = Some(self.clock.now());

        let previous = self.score.load(Ordering::Acquire);
        let updated = (previous + self.config.success_increment).min(100);
        self.score.store(updated, Ordering::Release);
    }

    /// Record a failed store operation. The penalty grows with the
    /// consecutive-failure count.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let penalty = self.config.failure_base_penalty.saturating_mul(failures);

        let previous = self.score.load(Ordering::Acquire);
        let updated = previous.saturating_sub(penalty);
        self.score.store(updated, Ordering::Release);

        debug!(
            consecutive_failures = failures,
            penalty = penalty,
            health_score = updated,
            "📉 Backing store health degraded"
        );
    }

    pub fn health_score(&self) -> u32 {
        self.score.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        *self.last_success_at.lock()
    }

    /// Update the observed connection-pool utilization in [0.0, 1.0].
    pub fn set_pool_utilization(&self, utilization: f64) {
        let clamped = utilization.clamp(0.0, 1.0) as f32;
        self.pool_utilization
            .store(clamped.to_bits(), Ordering::Release);
    }

    pub fn pool_utilization(&self) -> f64 {
        f64::from(f32::from_bits(self.pool_utilization.load(Ordering::Acquire)))
    }

    /// Whether the score clears the readiness threshold.
    pub fn is_score_healthy(&self) -> bool {
        self.health_score() >= self.config.min_healthy_score
    }

    /// Whether pool utilization is below the readiness threshold.
    pub fn is_pool_available(&self) -> bool {
        self.pool_utilization() <= self.config.max_pool_utilization
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Build the full snapshot, with circuit state supplied by the guard.
    pub fn snapshot(&self, circuit_state: CircuitState) -> ConnectionHealth {
        ConnectionHealth {
            circuit_state,
            consecutive_failures: self.consecutive_failures(),
            health_score: self.health_score(),
            pool_utilization: self.pool_utilization(),
            last_success_at: self.last_success_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(HealthConfig::default(), Arc::new(ManualClock::default()))
    }

    #[test]
    fn test_starts_at_full_health() {
        let m = monitor();
        assert_eq!(m.health_score(), 100);
        assert!(m.is_score_healthy());
        assert!(m.last_success_at().is_none());
    }

    #[test]
    fn test_success_caps_at_100() {
        let m = monitor();
        m.record_success();
        assert_eq!(m.health_score(), 100);
        assert!(m.last_success_at().is_some());
    }

    #[test]
    fn test_sustained_failure_penalized_more_than_isolated() {
        // One failure
        let single = monitor();
        single.record_failure();

        // Three consecutive failures
        let triple = monitor();
        triple.record_failure();
        triple.record_failure();
        triple.record_failure();

        assert!(triple.health_score() < single.health_score());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let m = monitor();
        m.record_failure();
        m.record_failure();
        m.record_success();
        assert_eq!(m.consecutive_failures(), 0);

        // Next failure is penalized as an isolated blip again
        let before = m.health_score();
        m.record_failure();
        assert_eq!(
            m.health_score(),
            before.saturating_sub(HealthConfig::default().failure_base_penalty)
        );
    }

    #[test]
    fn test_score_floors_at_zero() {
        let m = monitor();
        for _ in 0..20 {
            m.record_failure();
        }
        assert_eq!(m.health_score(), 0);
    }

    #[test]
    fn test_pool_utilization_clamped() {
        let m = monitor();
        m.set_pool_utilization(1.7);
        assert!((m.pool_utilization() - 1.0).abs() < f64::EPSILON);
        assert!(!m.is_pool_available());

        m.set_pool_utilization(0.5);
        assert!(m.is_pool_available());
    }
}

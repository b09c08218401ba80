//! Circuit breaker metrics snapshots for monitoring surfaces.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};

/// Point-in-time counters for one circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub component: String,
    pub current_state: CircuitState,
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Calls rejected without being attempted (circuit open).
    pub rejected_count: u64,
    pub consecutive_failures: u32,
}

impl CircuitBreakerMetrics {
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failure_count as f64 / self.total_calls as f64
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total_calls as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_with_zero_calls() {
        let metrics = CircuitBreakerMetrics {
            component: "test".to_string(),
            current_state: CircuitState::Closed,
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            consecutive_failures: 0,
        };
        assert_eq!(metrics.failure_rate(), 0.0);
        assert_eq!(metrics.success_rate(), 0.0);
    }

    #[test]
    fn test_rates() {
        let metrics = CircuitBreakerMetrics {
            component: "test".to_string(),
            current_state: CircuitState::Closed,
            total_calls: 10,
            success_count: 7,
            failure_count: 3,
            rejected_count: 2,
            consecutive_failures: 1,
        };
        assert!((metrics.failure_rate() - 0.3).abs() < f64::EPSILON);
        assert!((metrics.success_rate() - 0.7).abs() < f64::EPSILON);
    }
}

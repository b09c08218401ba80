//! # Retry Backoff
//!
//! One backoff computation for every tier. Exponential tiers get
//! `base * 2^attempt` plus jitter, capped; fixed tiers get their constant
//! delay. The result becomes the job's next `ready_at`: a scheduled
//! delay, never a busy-wait.

use crate::config::{BackoffConfig, BackoffStrategy};
use std::time::Duration;

/// Fraction of the computed delay added as random jitter, de-synchronizing
/// retry storms after a shared outage.
const JITTER_FACTOR: f64 = 0.1;

/// Delay before the next attempt. `attempt` counts attempts already made
/// (0 for the first retry).
pub fn compute_backoff(config: &BackoffConfig, attempt: u32) -> Duration {
    match config.strategy {
        BackoffStrategy::Fixed => Duration::from_millis(config.base_delay_ms),
        BackoffStrategy::Exponential => {
            // Saturate the shift well before overflow territory
            let exponent = attempt.min(32);
            let raw = config
                .base_delay_ms
                .saturating_mul(1u64 << exponent)
                .min(config.max_delay_ms);
            let jitter = (fastrand::f64() * JITTER_FACTOR * raw as f64) as u64;
            Duration::from_millis(raw.saturating_add(jitter).min(config.max_delay_ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff_is_constant() {
        let config = BackoffConfig::fixed(5_000);
        for attempt in 0..5 {
            assert_eq!(compute_backoff(&config, attempt), Duration::from_millis(5_000));
        }
    }

    #[test]
    fn test_exponential_backoff_doubles() {
        let config = BackoffConfig::exponential(1_000, 600_000);
        for attempt in 0..4u32 {
            let delay = compute_backoff(&config, attempt).as_millis() as u64;
            let base = 1_000 * (1 << attempt);
            assert!(delay >= base, "attempt {attempt}: {delay} < {base}");
            assert!(
                delay <= base + base / 10 + 1,
                "attempt {attempt}: jitter exceeds bound"
            );
        }
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let config = BackoffConfig::exponential(1_000, 8_000);
        let delay = compute_backoff(&config, 10);
        assert_eq!(delay, Duration::from_millis(8_000));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let config = BackoffConfig::exponential(1_000, 60_000);
        let delay = compute_backoff(&config, u32::MAX);
        assert_eq!(delay, Duration::from_millis(60_000));
    }
}

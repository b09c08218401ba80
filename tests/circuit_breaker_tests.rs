//! Resilience-layer integration tests: circuit timing against an
//! injected clock, health score shape, and the readiness gate.

use aegis_core::config::AegisConfig;
use aegis_core::resilience::{CircuitBreakerError, CircuitState, ConnectionGuard};
use aegis_core::utils::ManualClock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn guard(failure_threshold: u32, open_timeout_ms: u64) -> (ConnectionGuard, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let mut config = AegisConfig::default();
    config.circuit_breaker.failure_threshold = failure_threshold;
    config.circuit_breaker.open_timeout_ms = open_timeout_ms;
    (ConnectionGuard::new(&config, clock.clone()), clock)
}

async fn fail_once(guard: &ConnectionGuard) {
    let _ = guard.execute(|| async { Err::<(), _>("store down") }).await;
}

#[tokio::test]
async fn circuit_opens_after_threshold_and_rejects_without_attempting() {
    let (guard, _clock) = guard(3, 10_000);

    for _ in 0..3 {
        fail_once(&guard).await;
    }
    assert_eq!(guard.circuit_state(), CircuitState::Open);

    // Within the open window: rejected immediately, operation not run
    let attempts = AtomicUsize::new(0);
    let result = guard
        .execute(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        })
        .await;
    assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exactly_one_trial_after_open_timeout() {
    let (guard, clock) = guard(1, 5_000);
    fail_once(&guard).await;
    assert_eq!(guard.circuit_state(), CircuitState::Open);

    clock.advance(Duration::from_millis(5_001));

    // The trial succeeds and closes the circuit
    let result = guard.execute(|| async { Ok::<_, String>("recovered") }).await;
    assert!(result.is_ok());
    assert_eq!(guard.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn failed_trial_reopens_the_window() {
    let (guard, clock) = guard(1, 5_000);
    fail_once(&guard).await;

    clock.advance(Duration::from_millis(5_001));
    fail_once(&guard).await;
    assert_eq!(guard.circuit_state(), CircuitState::Open);

    // A fresh window: still rejecting before the timeout elapses again
    clock.advance(Duration::from_millis(4_000));
    let result = guard.execute(|| async { Ok::<_, String>(()) }).await;
    assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
}

#[tokio::test]
async fn health_score_penalizes_sustained_failure_more() {
    let (one_failure, _c1) = guard(100, 1_000);
    fail_once(&one_failure).await;

    let (three_failures, _c2) = guard(100, 1_000);
    for _ in 0..3 {
        fail_once(&three_failures).await;
    }

    assert!(
        three_failures.health_status().health_score
            < one_failure.health_status().health_score
    );
}

#[tokio::test]
async fn health_status_surface_is_complete() {
    let (guard, _clock) = guard(5, 1_000);

    let _ = guard.execute(|| async { Ok::<_, String>(()) }).await;
    let health = guard.health_status();

    assert_eq!(health.circuit_state, CircuitState::Closed);
    assert_eq!(health.health_score, 100);
    assert_eq!(health.consecutive_failures, 0);
    assert!(health.last_success_at.is_some());
    assert!(health.pool_utilization < f64::EPSILON);
}

#[tokio::test]
async fn breaker_metrics_track_rejections() {
    let (guard, _clock) = guard(1, 60_000);
    fail_once(&guard).await;

    let _ = guard.execute(|| async { Ok::<_, String>(()) }).await;
    let _ = guard.execute(|| async { Ok::<_, String>(()) }).await;

    let metrics = guard.breaker_metrics();
    assert_eq!(metrics.failure_count, 1);
    assert_eq!(metrics.rejected_count, 2);
    assert_eq!(metrics.current_state, CircuitState::Open);
}

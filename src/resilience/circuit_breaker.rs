//! # Circuit Breaker Implementation
//!
//! Prevents cascade failures when the backing store degrades. Classic
//! three-state pattern: Closed (normal operation), Open (failing fast),
//! and HalfOpen (testing recovery with exactly one in-flight trial).

use crate::config::CircuitBreakerConfig;
use crate::resilience::metrics::CircuitBreakerMetrics;
use crate::utils::Clock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single trial call allowed through
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            2 => CircuitState::HalfOpen,
            // Default to the safest state
            _ => CircuitState::Open,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Core circuit breaker with atomic state management.
///
/// State transitions are simple atomic field updates; the only lock guards
/// the opened-at timestamp and is held for nanoseconds. Timing runs
/// through the injected [`Clock`] so recovery behavior is testable without
/// wall-clock waits.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    /// Failures since the last success while Closed
    consecutive_failures: AtomicU32,

    /// When the circuit last opened (for timeout calculations)
    opened_at: Mutex<Option<DateTime<Utc>>>,

    /// Guards the single HalfOpen trial
    probe_in_flight: AtomicBool,

    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,

    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            open_timeout_ms = config.open_timeout_ms,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            probe_in_flight: AtomicBool::new(false),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            clock,
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let is_probe = match self.acquire() {
            Some(is_probe) => is_probe,
            None => {
                self.rejected_count.fetch_add(1, Ordering::Relaxed);
                return Err(CircuitBreakerError::CircuitOpen {
                    component: self.name.clone(),
                });
            }
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(is_probe),
            Err(_) => self.record_failure(is_probe),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Decide whether a call may proceed. Returns `Some(true)` when the
    /// caller holds the HalfOpen probe, `Some(false)` for a normal Closed
    /// call, `None` when the call must be rejected.
    fn acquire(&self) -> Option<bool> {
        match self.state() {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                let elapsed = {
                    let opened_at = self.opened_at.lock();
                    opened_at.map(|t| self.clock.now() - t)
                };
                match elapsed {
                    Some(elapsed)
                        if elapsed
                            >= ChronoDuration::milliseconds(self.config.open_timeout_ms as i64) =>
                    {
                        self.transition_to_half_open();
                        self.try_take_probe()
                    }
                    Some(_) => None,
                    None => {
                        // Open without a timestamp shouldn't happen; allow the call
                        warn!(component = %self.name, "Circuit open but no timestamp recorded");
                        Some(false)
                    }
                }
            }
            CircuitState::HalfOpen => self.try_take_probe(),
        }
    }

    /// Exactly one trial call is permitted while HalfOpen.
    fn try_take_probe(&self) -> Option<bool> {
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(true)
        } else {
            None
        }
    }

    /// Record a successful operation
    fn record_success(&self, is_probe: bool) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);

        debug!(component = %self.name, "🟢 Operation succeeded");

        if is_probe || self.state() == CircuitState::HalfOpen {
            self.transition_to_closed();
        }
    }

    /// Record a failed operation
    fn record_failure(&self, is_probe: bool) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        error!(
            component = %self.name,
            consecutive_failures = failures,
            "🔴 Operation failed"
        );

        match self.state() {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    self.transition_to_open();
                }
            }
            // The failed trial immediately re-opens the circuit
            CircuitState::HalfOpen => self.transition_to_open(),
            CircuitState::Open => {
                if is_probe {
                    self.transition_to_open();
                }
            }
        }
    }

    /// Transition to closed state (normal operation)
    fn transition_to_closed(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
        *self.opened_at.lock() = None;

        info!(
            component = %self.name,
            total_calls = self.total_calls.load(Ordering::Relaxed),
            "🟢 Circuit breaker closed (recovered)"
        );
    }

    /// Transition to open state (failing fast)
    fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);
        *self.opened_at.lock() = Some(self.clock.now());
        self.probe_in_flight.store(false, Ordering::Release);

        error!(
            component = %self.name,
            failure_threshold = self.config.failure_threshold,
            open_timeout_ms = self.config.open_timeout_ms,
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    /// Transition to half-open state (testing recovery)
    fn transition_to_half_open(&self) {
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);

        info!(component = %self.name, "🟡 Circuit breaker half-open (testing recovery)");
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        self.transition_to_open();
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        self.transition_to_closed();
    }

    /// Consecutive failures recorded since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            component: self.name.clone(),
            current_state: self.state(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures(),
        }
    }
}

//! # Resilience Module
//!
//! Fault tolerance for the shared backing store. Every store operation in
//! the crate is mediated by a single [`ConnectionGuard`] instance so
//! circuit and health state stay globally consistent.
//!
//! ## Architecture
//!
//! - **Circuit Breaker**: Closed/Open/HalfOpen state machine that fails
//!   fast instead of cascading timeouts
//! - **Health Monitor**: smoothly-varying 0-100 reliability score plus
//!   pool-utilization tracking
//! - **Readiness Gate**: combines both signals; the queue manager and
//!   worker pools consult it before store-dependent work
//!
//! ## Usage
//!
//! ```rust,no_run
//! use aegis_core::config::AegisConfig;
//! use aegis_core::resilience::ConnectionGuard;
//! use aegis_core::utils::SystemClock;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AegisConfig::default();
//! let guard = ConnectionGuard::new(&config, Arc::new(SystemClock));
//!
//! let result = guard
//!     .execute(|| async {
//!         // store operation here
//!         Ok::<&str, std::io::Error>("ok")
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod guard;
pub mod health;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use guard::{ConnectionGuard, Readiness, ReadinessReason};
pub use health::{ConnectionHealth, HealthMonitor};
pub use metrics::CircuitBreakerMetrics;

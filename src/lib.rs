#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Aegis Core Rust
//!
//! High-performance Rust core for tiered safety-incident report processing.
//!
//! ## Overview
//!
//! Aegis Core is the job-processing heart of the Aegis safety reporting
//! platform. It guarantees that life-safety-critical reports are never
//! silently lost while routine reports are processed efficiently and
//! cheaply. Incoming events are classified into priority tiers, enqueued
//! onto a broker-backed queue (PostgreSQL, claimed atomically), and executed
//! by per-tier worker pools with retry, backoff, and stalled-job detection.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Classifier│───▶│ TieredQueueManager│───▶│ WorkerPool      │
//! │ (cascade) │    │ broker ⇄ fallback │    │ Dispatcher      │
//! └───────────┘    └────────┬─────────┘    └────────┬────────┘
//!                           │                       │
//!                  ┌────────▼─────────┐    ┌────────▼────────┐
//!                  │ ConnectionGuard  │    │ JobHandler      │
//!                  │ (circuit/health) │    │ registry        │
//!                  └──────────────────┘    └─────────────────┘
//! ```
//!
//! The Emergency tier additionally runs a synchronous direct-execution path
//! before queueing, with a degraded-write last resort, so a broker outage
//! can never drop a critical report.
//!
//! ## Module Organization
//!
//! - [`classification`] - Rule-cascade event classifier
//! - [`queue`] - Tiered queues over broker-backed and in-memory backends
//! - [`worker`] - Per-tier worker pools, retry policy, dead-letter store
//! - [`resilience`] - Circuit breaker, health scoring, readiness gate
//! - [`processing`] - Report processor entry point and emergency path
//! - [`services`] - Persistence and notification collaborator interfaces
//! - [`config`] - Canonical configuration (single source for every tunable)
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aegis_core::config::AegisConfig;
//! use aegis_core::processing::AegisCore;
//! use serde_json::json;
//!
//! # async fn example() -> aegis_core::error::Result<()> {
//! let config = AegisConfig::default();
//! let core = AegisCore::in_memory(config);
//! core.start().await?;
//!
//! let outcome = core
//!     .processor()
//!     .process_report(json!({"description": "streetlight out"}), Default::default())
//!     .await?;
//! println!("report {} routed to {}", outcome.report_id, outcome.tier);
//! # Ok(())
//! # }
//! ```

pub mod classification;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod processing;
pub mod queue;
pub mod resilience;
pub mod services;
pub mod utils;
pub mod worker;

pub use classification::{ClassificationResult, ReportClassifier};
pub use config::{AegisConfig, BackoffStrategy, TierConfig};
pub use constants::Tier;
pub use error::{AegisError, Result};
pub use processing::{AegisCore, ProcessOptions, ProcessOutcome, ReportProcessor};
pub use queue::{Job, JobOptions, JobState, QueueBackend, TieredQueueManager};
pub use resilience::{CircuitBreaker, CircuitState, ConnectionGuard, HealthMonitor};
pub use worker::{DeadLetterRecord, DeadLetterStore, JobHandler, WorkerPoolDispatcher};

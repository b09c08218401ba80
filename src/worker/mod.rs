//! # Worker Pool Dispatcher
//!
//! Per-tier pools of concurrent workers that pull jobs in priority order,
//! run the registered handler under the tier's time budget, and apply the
//! retry, stall, and dead-letter policies. Each tier is an independent
//! pool; higher tiers get more workers, not preemption.

pub mod dead_letter;
pub mod handler;
pub mod pool;
pub mod retry;

pub use dead_letter::{DeadLetterRecord, DeadLetterStore};
pub use handler::{HandlerRegistry, JobHandler};
pub use pool::{WorkerPool, WorkerPoolDispatcher};
pub use retry::compute_backoff;

//! # Report Processing
//!
//! The entry point consumed by the HTTP/application layer, and the
//! emergency direct-execution path that guarantees life-safety-critical
//! reports are never silently lost. All components are explicitly
//! constructed and wired here at process start, with no globals.

pub mod core;
pub mod emergency;
pub mod report_processor;

pub use self::core::AegisCore;
pub use emergency::{EmergencyOutcome, EmergencyProcessor};
pub use report_processor::{ProcessOptions, ProcessOutcome, QueueUsed, ReportProcessor};

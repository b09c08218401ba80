//! # Event Classification
//!
//! Pure-function classification of raw incident events into priority
//! tiers. A configurable rule cascade, first match wins; no shared state
//! is ever mutated and malformed input never escapes as an error.

pub mod classifier;

pub use classifier::{ClassificationResult, ReportClassifier};

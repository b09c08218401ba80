use std::fmt;

/// Top-level error taxonomy for the processing core.
///
/// Only `EmergencyPathFailure` is ever allowed to reach the original
/// caller of report processing; every other variant is handled internally
/// (fail-soft: log, record stats, continue).
#[derive(Debug, Clone, PartialEq)]
pub enum AegisError {
    /// Malformed classification input. Non-fatal: classification falls
    /// through to the safe default tier.
    Classification(String),
    /// Broker unreachable or enqueue rejected. Non-fatal: triggers the
    /// in-memory fallback queue.
    Enqueue(String),
    /// Circuit breaker is open; the call was rejected without being
    /// attempted. Callers must back off.
    CircuitOpen(String),
    /// A job handler failed. Retried per tier policy.
    Processing(String),
    /// A job exhausted its retry budget and was dead-lettered.
    ExhaustedRetries(String),
    /// Both the emergency inline execution and the degraded fallback write
    /// failed. The single genuinely fatal condition in the subsystem.
    EmergencyPathFailure(String),
    DatabaseError(String),
    ConfigurationError(String),
}

impl fmt::Display for AegisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AegisError::Classification(msg) => write!(f, "Classification error: {msg}"),
            AegisError::Enqueue(msg) => write!(f, "Enqueue failure: {msg}"),
            AegisError::CircuitOpen(msg) => write!(f, "Circuit open: {msg}"),
            AegisError::Processing(msg) => write!(f, "Processing failure: {msg}"),
            AegisError::ExhaustedRetries(msg) => write!(f, "Retries exhausted: {msg}"),
            AegisError::EmergencyPathFailure(msg) => {
                write!(f, "Emergency path failure: {msg}")
            }
            AegisError::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            AegisError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for AegisError {}

pub type Result<T> = std::result::Result<T, AegisError>;

impl From<crate::queue::QueueError> for AegisError {
    fn from(err: crate::queue::QueueError) -> Self {
        match err {
            crate::queue::QueueError::CircuitOpen { component } => {
                AegisError::CircuitOpen(component)
            }
            crate::queue::QueueError::Database(msg) => AegisError::DatabaseError(msg),
            other => AegisError::Enqueue(other.to_string()),
        }
    }
}

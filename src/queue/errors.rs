//! Queue-layer error types.

use uuid::Uuid;

/// Errors surfaced by queue backends and the tiered manager.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database operation failed: {0}")]
    Database(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The in-memory fallback queue refused an insert at its depth bound.
    #[error("Queue {queue} at capacity ({depth} jobs)")]
    CapacityExceeded { queue: String, depth: usize },

    #[error("Job {id} not found in queue {queue}")]
    JobNotFound { id: Uuid, queue: String },

    /// The connection guard rejected the call without attempting it.
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// No broker backend is configured for this process.
    #[error("No broker configured")]
    BrokerUnavailable,
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        QueueError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<crate::resilience::CircuitBreakerError<QueueError>> for QueueError {
    fn from(err: crate::resilience::CircuitBreakerError<QueueError>) -> Self {
        match err {
            crate::resilience::CircuitBreakerError::CircuitOpen { component } => {
                QueueError::CircuitOpen { component }
            }
            crate::resilience::CircuitBreakerError::OperationFailed(inner) => inner,
        }
    }
}

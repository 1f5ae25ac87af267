//! Error types for Intake
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in Intake
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Queue infrastructure failure (missing queue, broken backend) - fatal to the run loop
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Queue backend error while resolving a message (commit/abort/enqueue)
    #[error("Queue error: {0}")]
    Queue(String),

    /// Cooperative cancellation observed at a suspension point
    #[error("Cancelled")]
    Cancelled,

    /// Contact store / business error inside the work executor
    #[error("Store error: {0}")]
    Store(String),

    /// Startup configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IntakeError {
    /// Whether this error should terminate the run loop rather than
    /// resolve as a per-message failure.
    pub fn is_fatal_to_loop(&self) -> bool {
        matches!(self, IntakeError::QueueUnavailable(_) | IntakeError::Queue(_))
    }
}

/// Result type alias for Intake operations
pub type Result<T> = std::result::Result<T, IntakeError>;

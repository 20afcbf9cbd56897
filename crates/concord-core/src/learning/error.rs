//! Error types internal to the learning subsystem.
//!
//! These never cross the `LearningObserver` boundary: the core logs them and
//! counts them toward its circuit breaker.

/// Errors produced while deriving patterns or insights.
#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    #[error("event {kind} is missing context field '{field}'")]
    MalformedEvent { kind: String, field: String },

    #[error("pattern store lock poisoned")]
    StorePoisoned,

    #[error("pattern store error: {0}")]
    Store(String),

    #[error("learning queue closed")]
    QueueClosed,

    #[error("learning workers need a Tokio runtime")]
    NoRuntime,
}

/// Result type for learning operations.
pub type LearningResult<T> = std::result::Result<T, LearningError>;

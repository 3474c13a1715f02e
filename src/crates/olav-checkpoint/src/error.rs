//! Error types for checkpoint and audit storage.

use thiserror::Error;

/// Errors that can occur in checkpoint or audit storage
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The store rejected a step index that does not advance the thread
    #[error("non-monotonic step {step} for thread {thread_id} (latest is {latest})")]
    NonMonotonicStep {
        thread_id: String,
        step: u64,
        latest: u64,
    },

    /// The requested thread or checkpoint does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A pending interrupt already exists for the thread
    #[error("thread {0} already has a pending interrupt")]
    InterruptPending(String),

    /// Invalid input to a store operation
    #[error("invalid checkpoint operation: {0}")]
    Invalid(String),

    /// The backing store is unreachable or failed; the run must end
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),

    /// Snapshot (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

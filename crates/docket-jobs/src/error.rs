//! Job error types.

use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job execution failed.
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Execution stopped because shutdown was requested.
    #[error("Job was cancelled")]
    Cancelled,

    /// No executor is registered for the stored job type.
    #[error("No executor registered for job type: {0}")]
    UnknownJobType(String),

    /// Payload missing or not in the shape the executor expects.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Store returned something it should not have.
    #[error("Store error: {0}")]
    Store(String),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Scheduler error.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns true if the error comes from the backing store rather than
    /// from the job itself.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            JobError::Redis(_) | JobError::Pool(_) | JobError::Store(_)
        )
    }

    /// Shorthand for an execution failure with a formatted reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        JobError::ExecutionFailed(reason.into())
    }
}

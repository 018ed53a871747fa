//! Error types for the orchestration core

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for taskmill
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A job with the same name already exists
    #[error("duplicate job name: {0}")]
    DuplicateName(String),

    /// A job with the same idempotency key already exists
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// A cron expression could not be parsed
    #[error("invalid cron expression: {0}")]
    InvalidCronExpression(String),

    /// A schedule must carry exactly one of cron_expression or run_at
    #[error("invalid schedule: exactly one of cron_expression or run_at must be set")]
    InvalidScheduleSpec,

    /// A job kind string did not name a known executor discipline
    #[error("unknown job kind: {0}")]
    UnknownJobKind(String),

    /// A function reference is not present in the registry
    #[error("unregistered function: {0}")]
    UnregisteredFunction(String),

    /// The executor was shut down before the call
    #[error("executor is closed")]
    ExecutorClosed,

    /// The operation was cancelled by orchestrator shutdown
    #[error("operation cancelled")]
    Cancelled,

    /// No job exists with the given id
    #[error("job not found: {0}")]
    JobNotFound(i64),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying storage errors (fatal to the enclosing operation)
    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    /// JSON encode/decode errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// One or more executors failed to shut down
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// True for errors caused by caller input rather than the engine
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::DuplicateName(_)
                | Error::DuplicateIdempotencyKey(_)
                | Error::InvalidCronExpression(_)
                | Error::InvalidScheduleSpec
                | Error::UnknownJobKind(_)
                | Error::UnregisteredFunction(_)
                | Error::JobNotFound(_)
                | Error::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::DuplicateName("nightly-report".to_string());
        assert!(err.to_string().contains("nightly-report"));

        let err = Error::InvalidCronExpression("bogus".to_string());
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_user_error_classification() {
        assert!(Error::InvalidScheduleSpec.is_user_error());
        assert!(Error::JobNotFound(7).is_user_error());
        assert!(!Error::ExecutorClosed.is_user_error());
        assert!(!Error::Cancelled.is_user_error());
    }
}

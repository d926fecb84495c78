use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid job arguments: {0}")]
    InvalidArgs(#[from] serde_json::Error),

    #[error("No handler registered for job kind {0}")]
    NoHandler(String),

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    /// Retried with backoff until attempts run out
    #[error("{0}")]
    Retryable(String),

    /// Failed without further attempts
    #[error("{0}")]
    Permanent(String),
}

impl JobError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        JobError::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        JobError::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Database(_) | JobError::Retryable(_))
    }
}

impl From<crate::chain::ChainError> for JobError {
    fn from(e: crate::chain::ChainError) -> Self {
        if e.is_transient() {
            JobError::Retryable(e.to_string())
        } else {
            JobError::Permanent(e.to_string())
        }
    }
}

impl From<crate::webhook::WebhookError> for JobError {
    fn from(e: crate::webhook::WebhookError) -> Self {
        match e {
            crate::webhook::WebhookError::Database(e) => JobError::Database(e),
            other => JobError::Permanent(other.to_string()),
        }
    }
}

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Webhook not found: {0}")]
    NotFound(Uuid),
}

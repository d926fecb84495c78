use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl ChainError {
    /// Errors worth retrying without operator involvement
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Network(_) | ChainError::Timeout(_))
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ChainError::Malformed(e.to_string())
        } else {
            ChainError::Network(e.to_string())
        }
    }
}

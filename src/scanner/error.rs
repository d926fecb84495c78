use thiserror::Error;

use crate::chain::ChainError;
use crate::core_types::Blockchain;
use crate::wallet::WalletError;
use crate::webhook::WebhookError;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("Explorer error: {0}")]
    Explorer(ChainError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Wallet lookup failed: {0}")]
    Wallet(#[from] WalletError),

    #[error("Webhook payload error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Malformed block {height}: {reason}")]
    MalformedBlock { height: u64, reason: String },

    #[error("{chain} block {height} still malformed after {attempts} attempts")]
    PoisonBlock {
        chain: Blockchain,
        height: u64,
        attempts: u32,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScannerError {
    /// Retried after the configured delay with the checkpoint untouched
    pub fn is_transient(&self) -> bool {
        match self {
            ScannerError::Explorer(e) => e.is_transient(),
            ScannerError::Database(_) | ScannerError::Wallet(_) => true,
            _ => false,
        }
    }

    pub(crate) fn from_chain(height: u64, e: ChainError) -> Self {
        match e {
            ChainError::Malformed(reason) => ScannerError::MalformedBlock { height, reason },
            other => ScannerError::Explorer(other),
        }
    }
}

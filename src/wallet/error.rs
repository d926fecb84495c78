use thiserror::Error;

use crate::chain::ChainError;
use crate::core_types::Blockchain;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Key derivation failed: {0}")]
    Derivation(#[from] ChainError),

    #[error("Wallet not found: {chain} {address}")]
    NotFound { chain: Blockchain, address: String },

    #[error("Invalid wallet request: {0}")]
    Invalid(String),
}

//! Transfer error types
//!
//! Validation errors reject a request outright; transient errors are retried
//! by the job queue; the rest fail the transfer.

use thiserror::Error;

use crate::chain::ChainError;
use crate::core_types::TransferId;

#[derive(Error, Debug, Clone)]
pub enum TransferError {
    // === Validation ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("At least one source address is required")]
    NoSourceAddress,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Source address {0} is not a wallet of this owner")]
    UnknownSourceAddress(String),

    #[error("Blockchain {0} has no wallet SDK configured")]
    UnsupportedBlockchain(String),

    #[error("Unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // === Business failures ===
    #[error("Insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: String, available: String },

    #[error("Fee {fee} exceeds limit {max_fee}")]
    FeeTooHigh { fee: String, max_fee: String },

    #[error("Amount after fee is below dust limit")]
    BelowDust,

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    // === Infrastructure ===
    #[error("Chain error: {0}")]
    Chain(ChainError),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    SystemError(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Another writer changed the transfer first
    #[error("Transfer {0} was modified concurrently")]
    Conflict(TransferId),
}

impl TransferError {
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::NoSourceAddress => "NO_SOURCE_ADDRESS",
            TransferError::InvalidAddress(_) => "INVALID_ADDRESS",
            TransferError::UnknownSourceAddress(_) => "UNKNOWN_SOURCE_ADDRESS",
            TransferError::UnsupportedBlockchain(_) => "UNSUPPORTED_BLOCKCHAIN",
            TransferError::UnsupportedAsset(_) => "UNSUPPORTED_ASSET",
            TransferError::InvalidRequest(_) => "INVALID_REQUEST",
            TransferError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            TransferError::FeeTooHigh { .. } => "FEE_TOO_HIGH",
            TransferError::BelowDust => "BELOW_DUST",
            TransferError::Rejected(_) => "REJECTED",
            TransferError::Chain(_) => "CHAIN_ERROR",
            TransferError::DatabaseError(_) => "DATABASE_ERROR",
            TransferError::SystemError(_) => "SYSTEM_ERROR",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            TransferError::Conflict(_) => "CONFLICT",
        }
    }

    /// Rejected at request time, never retried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            TransferError::InvalidAmount
                | TransferError::NoSourceAddress
                | TransferError::InvalidAddress(_)
                | TransferError::UnknownSourceAddress(_)
                | TransferError::UnsupportedBlockchain(_)
                | TransferError::UnsupportedAsset(_)
                | TransferError::InvalidRequest(_)
        )
    }

    /// Worth another attempt later
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Chain(e) => e.is_transient(),
            TransferError::DatabaseError(_) | TransferError::Conflict(_) => true,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::DatabaseError(e.to_string())
    }
}

impl From<ChainError> for TransferError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::InvalidAddress(a) => TransferError::InvalidAddress(a),
            ChainError::Rejected(r) => TransferError::Rejected(r),
            other => TransferError::Chain(other),
        }
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::SystemError(e.to_string())
    }
}

impl From<crate::wallet::WalletError> for TransferError {
    fn from(e: crate::wallet::WalletError) -> Self {
        match e {
            crate::wallet::WalletError::Database(e) => TransferError::DatabaseError(e.to_string()),
            other => TransferError::SystemError(other.to_string()),
        }
    }
}

impl From<crate::webhook::WebhookError> for TransferError {
    fn from(e: crate::webhook::WebhookError) -> Self {
        match e {
            crate::webhook::WebhookError::Database(e) => TransferError::DatabaseError(e.to_string()),
            other => TransferError::SystemError(other.to_string()),
        }
    }
}

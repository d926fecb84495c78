use thiserror::Error;

use crate::chain::ChainError;
use crate::wallet::WalletError;
use crate::webhook::WebhookError;

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("Mempool feed error: {0}")]
    Feed(#[from] ChainError),

    #[error("Wallet lookup failed: {0}")]
    Wallet(#[from] WalletError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),
}

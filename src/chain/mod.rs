//! Chain adapter seams
//!
//! Everything the core needs from a blockchain goes through the traits in
//! this module: the indexer (`Explorer`), the per-family wallet SDKs, key
//! derivation and the mempool feed.

pub mod address;
pub mod error;
pub mod explorer;
pub mod http;
pub mod sdk;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use address::candidate_addresses;
pub use error::ChainError;
pub use explorer::{Explorer, MempoolFeed, MempoolStream};
pub use http::{HttpExplorer, HttpMempoolFeed};
pub use sdk::{
    EvmFeeQuote, EvmTransferRequest, EvmWalletSdk, KeyDeriver, TronDelegation, TronResourceQuote,
    TronTransferRequest, TronWalletSdk, UtxoBuildRequest, UtxoOutput, UtxoWalletSdk,
};
pub use types::{AssetBalance, BlockQuery, ExplorerTransaction, SignedTransaction, TransactionEvent, Utxo};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Collaborators handed to the transfer workflows.
///
/// A family whose SDK is `None` cannot send; its transfers fail validation.
#[derive(Clone)]
pub struct ChainAdapters {
    pub explorer: Arc<dyn Explorer>,
    pub utxo: Option<Arc<dyn UtxoWalletSdk>>,
    pub evm: Option<Arc<dyn EvmWalletSdk>>,
    pub tron: Option<Arc<dyn TronWalletSdk>>,
    pub request_timeout: Duration,
}

impl ChainAdapters {
    pub fn new(explorer: Arc<dyn Explorer>) -> Self {
        Self {
            explorer,
            utxo: None,
            evm: None,
            tron: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_utxo(mut self, sdk: Arc<dyn UtxoWalletSdk>) -> Self {
        self.utxo = Some(sdk);
        self
    }

    pub fn with_evm(mut self, sdk: Arc<dyn EvmWalletSdk>) -> Self {
        self.evm = Some(sdk);
        self
    }

    pub fn with_tron(mut self, sdk: Arc<dyn TronWalletSdk>) -> Self {
        self.tron = Some(sdk);
        self
    }
}

/// Bound a collaborator call
pub async fn with_timeout<T, F>(duration: Duration, fut: F) -> Result<T, ChainError>
where
    F: Future<Output = Result<T, ChainError>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ChainError::Timeout(duration))?
}

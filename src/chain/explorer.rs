use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::ChainError;
use super::types::{AssetBalance, BlockQuery, ExplorerTransaction, Utxo};
use crate::core_types::Blockchain;

/// Read access to a blockchain indexer
#[async_trait]
pub trait Explorer: Send + Sync {
    async fn last_block_number(&self, chain: Blockchain) -> Result<u64, ChainError>;

    async fn find_transactions(
        &self,
        chain: Blockchain,
        query: &BlockQuery,
    ) -> Result<Vec<ExplorerTransaction>, ChainError>;

    /// `Ok(None)` when the indexer has not seen the transaction
    async fn get_transaction_info(
        &self,
        chain: Blockchain,
        hash: &str,
    ) -> Result<Option<ExplorerTransaction>, ChainError>;

    async fn get_utxo(&self, chain: Blockchain, address: &str) -> Result<Vec<Utxo>, ChainError>;

    async fn address_balances(
        &self,
        chain: Blockchain,
        address: &str,
    ) -> Result<Vec<AssetBalance>, ChainError>;
}

pub type MempoolStream = BoxStream<'static, Result<ExplorerTransaction, ChainError>>;

/// Push feed of unconfirmed transactions (bitcoin-like chains)
#[async_trait]
pub trait MempoolFeed: Send + Sync {
    async fn subscribe(&self, chain: Blockchain) -> Result<MempoolStream, ChainError>;
}

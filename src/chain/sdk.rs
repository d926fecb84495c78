//! Wallet SDK seams: derivation, building, signing and broadcast.
//!
//! Key material never crosses these traits; implementations look keys up
//! from the owner and the wallet sequence behind each address.

use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use super::error::ChainError;
use super::types::{SignedTransaction, Utxo};
use crate::core_types::{Blockchain, OwnerId, WalletType};

#[async_trait]
pub trait KeyDeriver: Send + Sync {
    async fn derive_address(
        &self,
        chain: Blockchain,
        wallet_type: WalletType,
        owner_id: OwnerId,
        sequence: i32,
    ) -> Result<String, ChainError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoOutput {
    pub address: String,
    pub value: u64,
}

#[derive(Debug, Clone)]
pub struct UtxoBuildRequest {
    pub chain: Blockchain,
    pub owner_id: OwnerId,
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<UtxoOutput>,
}

#[async_trait]
pub trait UtxoWalletSdk: Send + Sync {
    async fn build_and_sign(&self, request: &UtxoBuildRequest) -> Result<SignedTransaction, ChainError>;

    /// Returns the transaction hash reported by the node
    async fn broadcast(&self, chain: Blockchain, raw: &str) -> Result<String, ChainError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmFeeQuote {
    pub gas_limit: u64,
    pub gas_price: BigUint,
}

#[derive(Debug, Clone)]
pub struct EvmTransferRequest {
    pub chain: Blockchain,
    pub owner_id: OwnerId,
    pub from: String,
    pub to: String,
    /// Token contract, `None` for the native coin
    pub asset: Option<String>,
    pub amount: BigUint,
    pub gas_limit: u64,
    pub gas_price: BigUint,
}

#[async_trait]
pub trait EvmWalletSdk: Send + Sync {
    async fn estimate_fee(
        &self,
        chain: Blockchain,
        from: &str,
        to: &str,
        asset: Option<&str>,
    ) -> Result<EvmFeeQuote, ChainError>;

    async fn balance(&self, chain: Blockchain, address: &str, asset: Option<&str>) -> Result<BigUint, ChainError>;

    async fn token_decimals(&self, chain: Blockchain, contract: &str) -> Result<u32, ChainError>;

    async fn build_and_sign(&self, request: &EvmTransferRequest) -> Result<SignedTransaction, ChainError>;

    async fn broadcast(&self, chain: Blockchain, raw: &str) -> Result<String, ChainError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TronResourceQuote {
    pub energy_required: u64,
    pub energy_available: u64,
    pub bandwidth_required: u64,
    pub bandwidth_available: u64,
    /// TRX burned (in sun) when resources are missing
    pub burn_fee: u64,
}

impl TronResourceQuote {
    pub fn energy_shortfall(&self) -> u64 {
        self.energy_required.saturating_sub(self.energy_available)
    }
}

#[derive(Debug, Clone)]
pub struct TronTransferRequest {
    pub owner_id: OwnerId,
    pub from: String,
    pub to: String,
    /// TRC-20 contract, `None` for TRX
    pub asset: Option<String>,
    pub amount: u64,
    pub fee_limit: u64,
}

/// Energy delegation from a processing wallet to a hot wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TronDelegation {
    pub owner_id: OwnerId,
    pub from: String,
    pub receiver: String,
    pub energy: u64,
}

#[async_trait]
pub trait TronWalletSdk: Send + Sync {
    async fn estimate_resources(
        &self,
        from: &str,
        to: &str,
        asset: Option<&str>,
        amount: u64,
    ) -> Result<TronResourceQuote, ChainError>;

    async fn balance(&self, address: &str, asset: Option<&str>) -> Result<u64, ChainError>;

    async fn token_decimals(&self, contract: &str) -> Result<u32, ChainError>;

    async fn build_delegation(&self, request: &TronDelegation) -> Result<SignedTransaction, ChainError>;

    async fn build_reclaim(&self, request: &TronDelegation) -> Result<SignedTransaction, ChainError>;

    async fn build_and_sign(&self, request: &TronTransferRequest) -> Result<SignedTransaction, ChainError>;

    async fn broadcast(&self, raw: &str) -> Result<String, ChainError>;
}

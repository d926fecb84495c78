use serde::{Deserialize, Serialize};

use crate::core_types::{Blockchain, OwnerId, WalletType};

/// Deposit wallet, one per external (merchant-side) wallet id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotWallet {
    pub blockchain: Blockchain,
    pub address: String,
    pub owner_id: OwnerId,
    pub external_id: String,
    pub sequence: i32,
    pub is_dirty: bool,
    pub is_activated: bool,
}

/// Per-owner wallet that funds fees and resource delegations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingWallet {
    pub blockchain: Blockchain,
    pub address: String,
    pub owner_id: OwnerId,
    pub sequence: i32,
}

/// Owner-supplied storage address; no keys held
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColdWallet {
    pub blockchain: Blockchain,
    pub address: String,
    pub owner_id: OwnerId,
}

/// Result of an ownership check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletMatch {
    pub wallet_type: WalletType,
    pub owner_id: OwnerId,
    /// Address as stored, which may differ in encoding from the query
    pub address: String,
    pub external_id: Option<String>,
    pub activated: Option<bool>,
}

impl From<&HotWallet> for WalletMatch {
    fn from(w: &HotWallet) -> Self {
        Self {
            wallet_type: WalletType::Hot,
            owner_id: w.owner_id,
            address: w.address.clone(),
            external_id: Some(w.external_id.clone()),
            activated: Some(w.is_activated),
        }
    }
}

impl From<&ProcessingWallet> for WalletMatch {
    fn from(w: &ProcessingWallet) -> Self {
        Self {
            wallet_type: WalletType::Processing,
            owner_id: w.owner_id,
            address: w.address.clone(),
            external_id: None,
            activated: None,
        }
    }
}

impl From<&ColdWallet> for WalletMatch {
    fn from(w: &ColdWallet) -> Self {
        Self {
            wallet_type: WalletType::Cold,
            owner_id: w.owner_id,
            address: w.address.clone(),
            external_id: None,
            activated: None,
        }
    }
}

/// Flag change on a hot wallet, applied in the database and then the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletUpdate {
    MarkDirty { blockchain: Blockchain, address: String },
    MarkActivated { blockchain: Blockchain, address: String },
}

impl WalletUpdate {
    pub fn blockchain(&self) -> Blockchain {
        match self {
            WalletUpdate::MarkDirty { blockchain, .. } | WalletUpdate::MarkActivated { blockchain, .. } => {
                *blockchain
            }
        }
    }

    pub fn address(&self) -> &str {
        match self {
            WalletUpdate::MarkDirty { address, .. } | WalletUpdate::MarkActivated { address, .. } => address,
        }
    }
}

/// Sequence scope: EVM chains share one derivation path
pub fn sequence_scope(chain: Blockchain) -> &'static str {
    if chain.is_evm() { "evm" } else { chain.as_str() }
}

//! Data returned by the explorer and passed to the wallet SDKs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Block selector for `Explorer::find_transactions`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockQuery {
    Height(u64),
    Hash(String),
}

/// One value movement inside a transaction.
///
/// `event_key` is unique per chain: UTXO explorers use `txid:vout`, account
/// chains use `hash:log_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub event_key: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    pub amount: Decimal,
    /// Native ticker or token contract
    pub asset: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorerTransaction {
    pub hash: String,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub confirmations: u64,
    pub success: bool,
    #[serde(default)]
    pub events: Vec<TransactionEvent>,
}

impl ExplorerTransaction {
    /// All distinct senders, in event order
    pub fn from_addresses(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for from in self.events.iter().filter_map(|e| e.from.as_ref()) {
            if !out.contains(from) {
                out.push(from.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Value in satoshi
    pub value: u64,
    pub address: String,
    #[serde(default)]
    pub confirmations: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub balance: Decimal,
}

/// Signed, not yet broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub hash: String,
    /// Hex encoded raw transaction
    pub raw: String,
    /// Virtual size in vbytes (UTXO chains), 0 elsewhere
    #[serde(default)]
    pub vsize: u64,
}

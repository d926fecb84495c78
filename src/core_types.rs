//! Core types used throughout the system
//!
//! Blockchain identifiers, chain families and wallet categories. These are
//! stored as lowercase TEXT in PostgreSQL and serialized the same way in
//! webhook payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Owner (merchant account) ID
pub type OwnerId = Uuid;

/// Transfer ID
pub type TransferId = Uuid;

/// Blockchains handled by the processing core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Blockchain {
    Bitcoin,
    Litecoin,
    #[serde(rename = "bitcoincash")]
    BitcoinCash,
    Dogecoin,
    Ethereum,
    #[serde(rename = "bsc")]
    BinanceSmartChain,
    Polygon,
    Arbitrum,
    Tron,
}

/// Family of a blockchain; decides which workflow variant drives transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    /// Bitcoin-like UTXO chains
    Utxo,
    /// Account-based EVM chains
    Evm,
    Tron,
}

impl Blockchain {
    pub const ALL: [Blockchain; 9] = [
        Blockchain::Bitcoin,
        Blockchain::Litecoin,
        Blockchain::BitcoinCash,
        Blockchain::Dogecoin,
        Blockchain::Ethereum,
        Blockchain::BinanceSmartChain,
        Blockchain::Polygon,
        Blockchain::Arbitrum,
        Blockchain::Tron,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Blockchain::Bitcoin => "bitcoin",
            Blockchain::Litecoin => "litecoin",
            Blockchain::BitcoinCash => "bitcoincash",
            Blockchain::Dogecoin => "dogecoin",
            Blockchain::Ethereum => "ethereum",
            Blockchain::BinanceSmartChain => "bsc",
            Blockchain::Polygon => "polygon",
            Blockchain::Arbitrum => "arbitrum",
            Blockchain::Tron => "tron",
        }
    }

    pub fn family(&self) -> ChainFamily {
        match self {
            Blockchain::Bitcoin
            | Blockchain::Litecoin
            | Blockchain::BitcoinCash
            | Blockchain::Dogecoin => ChainFamily::Utxo,
            Blockchain::Ethereum
            | Blockchain::BinanceSmartChain
            | Blockchain::Polygon
            | Blockchain::Arbitrum => ChainFamily::Evm,
            Blockchain::Tron => ChainFamily::Tron,
        }
    }

    #[inline]
    pub fn is_evm(&self) -> bool {
        self.family() == ChainFamily::Evm
    }

    /// Accounts must receive a first funding transfer before they can send
    pub fn requires_activation(&self) -> bool {
        matches!(self, Blockchain::Tron)
    }

    /// Mempool push feeds exist only for bitcoin-like chains
    pub fn has_mempool_feed(&self) -> bool {
        self.family() == ChainFamily::Utxo
    }

    /// Native coin decimals (satoshi, wei, sun)
    pub fn decimals(&self) -> u32 {
        match self.family() {
            ChainFamily::Utxo => 8,
            ChainFamily::Evm => 18,
            ChainFamily::Tron => 6,
        }
    }

    /// Native asset ticker used in webhook payloads
    pub fn native_asset(&self) -> &'static str {
        match self {
            Blockchain::Bitcoin => "BTC",
            Blockchain::Litecoin => "LTC",
            Blockchain::BitcoinCash => "BCH",
            Blockchain::Dogecoin => "DOGE",
            Blockchain::Ethereum | Blockchain::Arbitrum => "ETH",
            Blockchain::BinanceSmartChain => "BNB",
            Blockchain::Polygon => "POL",
            Blockchain::Tron => "TRX",
        }
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Blockchain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Blockchain::ALL
            .iter()
            .copied()
            .find(|b| b.as_str() == lower)
            .ok_or_else(|| format!("Unsupported blockchain: {}", s))
    }
}

/// Wallet category; ownership checks always run Hot → Processing → Cold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    Hot,
    Processing,
    Cold,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Hot => "hot",
            WalletType::Processing => "processing",
            WalletType::Cold => "cold",
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WalletType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hot" => Ok(WalletType::Hot),
            "processing" => Ok(WalletType::Processing),
            "cold" => Ok(WalletType::Cold),
            _ => Err(format!("Invalid wallet type: {}", s)),
        }
    }
}

/// Convert a coin amount into integer base units (satoshi, sun).
///
/// Returns `None` when the amount is negative, has more precision than the
/// chain supports, or does not fit in `u64`.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Option<u64> {
    if amount.is_sign_negative() {
        return None;
    }
    let scaled = amount.checked_mul(Decimal::from(10u64.checked_pow(decimals)?))?;
    if scaled.fract() != Decimal::ZERO {
        return None;
    }
    u64::try_from(scaled).ok()
}

/// Convert integer base units back into a coin amount
pub fn from_base_units(units: u64, decimals: u32) -> Decimal {
    Decimal::from_i128_with_scale(units as i128, decimals).normalize()
}

//! Wallet ownership: storage, in-memory mirror, resolution and write paths
//!
//! Three wallet categories are tracked per blockchain: hot (deposit),
//! processing (fees and resource delegation) and cold (owner storage).

pub mod cache;
pub mod error;
pub mod resolver;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use cache::{RefreshOutcome, WalletCache};
pub use error::WalletError;
pub use resolver::WalletResolver;
pub use service::WalletService;
pub use store::{PgWalletStore, WalletStore};
pub use types::{ColdWallet, HotWallet, ProcessingWallet, WalletMatch, WalletUpdate};

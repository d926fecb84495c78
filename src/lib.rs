//! custody_core - transaction processing core of a custodial payment backend
//!
//! # Modules
//!
//! - [`core_types`] - Blockchains, wallet types, base-unit conversion
//! - [`config`] - YAML application configuration
//! - [`chain`] - Explorer, wallet SDK and mempool feed seams
//! - [`wallet`] - Wallet storage, cache and ownership resolution
//! - [`scanner`] - Checkpointed per-chain deposit scanner
//! - [`mempool`] - Unconfirmed-transaction watcher
//! - [`transfer`] - Resumable outgoing transfer workflows
//! - [`jobs`] - Durable Postgres job queue and handlers
//! - [`webhook`] - Signed merchant callbacks
//! - [`app`] - Process wiring

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod db;
pub mod logging;
pub mod shutdown;

pub mod chain;
pub mod wallet;

pub mod jobs;
pub mod mempool;
pub mod scanner;
pub mod transfer;
pub mod webhook;

pub mod app;

// Convenient re-exports at crate root
pub use app::{App, AppError, WalletSdks};
pub use config::AppConfig;
pub use core_types::{Blockchain, ChainFamily, OwnerId, TransferId, WalletType};
pub use shutdown::{Shutdown, ShutdownRx};
pub use transfer::{Transfer, TransferRequest, TransferService, TransferStatus};

//! Mempool watcher for bitcoin-like chains
//!
//! A secondary, push-based signal: unconfirmed transactions touching a
//! watched hot address become `in_mempool` transaction webhooks. Block
//! confirmation is still reported by the deposit scanner.

pub mod error;
pub mod watcher;

pub use error::MempoolError;
pub use watcher::MempoolWatcher;

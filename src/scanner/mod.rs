//! Deposit scanner: one checkpointed worker per enabled blockchain

pub mod classifier;
pub mod error;
pub mod hooks;
pub mod store;
pub mod worker;

#[cfg(test)]
pub mod mock;

pub use classifier::{ClassifiedEvent, EventClassifier, Side, is_relevant};
pub use error::ScannerError;
pub use hooks::{ActivationHook, DirtyMarkingHook, PreCommitHook};
pub use store::{BlockCommit, CommitOutcome, PendingWebhook, PgScanStore, ScanStore};
pub use worker::ScannerWorker;

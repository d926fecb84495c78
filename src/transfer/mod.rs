//! Resumable outgoing transfers
//!
//! # Lifecycle
//!
//! ```text
//! new → processing → in_mempool → unconfirmed → completed
//!            ↓             ↓             ↓
//!          failed   (retried by the job queue, never failed)
//! ```
//!
//! A transfer is created by [`TransferService::create`], which enqueues a
//! `continue_transfer_workflow` job. The job handler calls
//! [`TransferEngine::run`], which executes the family's step table and
//! persists the snapshot around every step. Every status change writes a
//! `transfer_status` webhook in the same database transaction.

pub mod engine;
pub mod error;
pub mod service;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod types;
pub mod workflow;

#[cfg(test)]
pub mod mock;

pub use engine::{TransferEngine, WorkflowRun};
pub use error::TransferError;
pub use service::TransferService;
pub use snapshot::{Stage, StepId, StepRecord, StepState, WorkflowSnapshot};
pub use state::TransferStatus;
pub use store::{PgTransferStore, TransferStore};
pub use types::{
    StateData, SystemTransaction, SystemTxKind, SystemTxStatus, Transfer, TransferKind, TransferRequest,
};
pub use workflow::{ChainWorkflow, StepContext, StepOutcome};

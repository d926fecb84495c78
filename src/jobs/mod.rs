//! Durable Postgres job queue
//!
//! Jobs are rows in `jobs_tb`. Workers claim due rows with
//! `FOR UPDATE SKIP LOCKED`, run the handler registered for the kind, and
//! record the outcome: completion, a snooze that does not consume an
//! attempt, or a failure retried with exponential backoff until
//! `max_attempts` is reached.

pub mod error;
pub mod handlers;
pub mod job;
pub mod queue;
pub mod retry_backoff;
pub mod worker;

#[cfg(test)]
pub mod mock;

pub use error::JobError;
pub use handlers::{CleanupHandler, ConfirmationHandler, TransferHandler};
pub use job::{
    CleanupArgs, ContinueTransferArgs, JobKind, JobOutcome, JobRecord, JobState, NewJob, WaitConfirmationsArgs,
    unique_key,
};
pub use queue::{JobQueue, PgJobQueue};
pub use retry_backoff::BackoffRetryPolicy;
pub use worker::{JobHandler, JobWorkerPool};

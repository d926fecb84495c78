//! `continue_transfer_workflow`: one engine run per job execution

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::jobs::error::JobError;
use crate::jobs::job::{ContinueTransferArgs, JobKind, JobOutcome, JobRecord};
use crate::jobs::worker::JobHandler;
use crate::transfer::{TransferEngine, TransferError, WorkflowRun};

pub struct TransferHandler {
    engine: Arc<TransferEngine>,
}

impl TransferHandler {
    pub fn new(engine: Arc<TransferEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for TransferHandler {
    fn kind(&self) -> JobKind {
        JobKind::ContinueTransferWorkflow
    }

    async fn handle(&self, job: &JobRecord) -> Result<JobOutcome, JobError> {
        let args: ContinueTransferArgs = job.parse_args()?;

        match self.engine.run(args.transfer_id).await {
            Ok(WorkflowRun::Snoozed(delay)) => Ok(JobOutcome::Snooze(delay)),
            Ok(WorkflowRun::Completed | WorkflowRun::Failed | WorkflowRun::Frozen) => Ok(JobOutcome::Completed),
            Err(TransferError::TransferNotFound(id)) => Err(JobError::permanent(format!("transfer {} not found", id))),
            Err(err) => {
                if job.attempt + 1 >= job.max_attempts {
                    warn!(
                        job_id = %job.job_id,
                        transfer_id = %args.transfer_id,
                        "Last attempt failed: {}",
                        err
                    );
                    if let Err(e) = self.engine.abandon(args.transfer_id, &err).await {
                        warn!(transfer_id = %args.transfer_id, "Failed to mark transfer failed: {}", e);
                    }
                }
                Err(JobError::retryable(err.to_string()))
            }
        }
    }
}

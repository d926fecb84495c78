//! `wait_confirmations`: follow a deposit/transfer webhook's transaction to
//! its required depth, then emit the `completed` webhook. A reverted
//! transaction gets a `failed` webhook instead.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chain::{Explorer, ExplorerTransaction, with_timeout};
use crate::jobs::error::JobError;
use crate::jobs::job::{JobKind, JobOutcome, JobRecord, WaitConfirmationsArgs};
use crate::jobs::worker::JobHandler;
use crate::webhook::{EventStatus, NewWebhook, TransactionEventPayload, WebhookStore};

pub struct ConfirmationHandler {
    explorer: Arc<dyn Explorer>,
    webhooks: Arc<dyn WebhookStore>,
    poll_interval: Duration,
    request_timeout: Duration,
}

impl ConfirmationHandler {
    pub fn new(
        explorer: Arc<dyn Explorer>,
        webhooks: Arc<dyn WebhookStore>,
        poll_interval: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            explorer,
            webhooks,
            poll_interval,
            request_timeout,
        }
    }

    /// Copy the original event webhook with a new status
    async fn follow_up(
        &self,
        args: &WaitConfirmationsArgs,
        tx: &ExplorerTransaction,
        status: EventStatus,
    ) -> Result<uuid::Uuid, JobError> {
        let original = self
            .webhooks
            .get(args.webhook_id)
            .await?
            .ok_or_else(|| JobError::permanent(format!("webhook {} not found", args.webhook_id)))?;

        let mut payload: TransactionEventPayload = serde_json::from_value(original.payload)?;
        payload.status = status;
        payload.confirmations = tx.confirmations;

        let key = follow_up_dedupe_key(args, status);
        let webhook = NewWebhook::transaction_event(original.owner_id, &payload, key)?;
        Ok(self.webhooks.create(&webhook).await?)
    }
}

/// Dedupe key of the `status` follow-up to a webhook
pub fn follow_up_dedupe_key(args: &WaitConfirmationsArgs, status: EventStatus) -> String {
    format!("{}:{}:{}", args.blockchain.as_str(), args.webhook_id, status.as_str())
}

/// Dedupe key of the `completed` follow-up to a webhook
pub fn completed_dedupe_key(args: &WaitConfirmationsArgs) -> String {
    follow_up_dedupe_key(args, EventStatus::Completed)
}

#[async_trait]
impl JobHandler for ConfirmationHandler {
    fn kind(&self) -> JobKind {
        JobKind::WaitConfirmations
    }

    async fn handle(&self, job: &JobRecord) -> Result<JobOutcome, JobError> {
        let args: WaitConfirmationsArgs = job.parse_args()?;

        let info = with_timeout(
            self.request_timeout,
            self.explorer.get_transaction_info(args.blockchain, &args.hash),
        )
        .await?;

        let Some(tx) = info else {
            debug!(chain = %args.blockchain, hash = %args.hash, "Transaction not indexed yet");
            return Ok(JobOutcome::Snooze(self.poll_interval));
        };

        if !tx.success {
            let webhook_id = self.follow_up(&args, &tx, EventStatus::Failed).await?;
            warn!(chain = %args.blockchain, hash = %args.hash, %webhook_id, "Transaction reverted");
            return Ok(JobOutcome::Completed);
        }

        if tx.confirmations < args.required {
            debug!(
                chain = %args.blockchain,
                hash = %args.hash,
                confirmations = tx.confirmations,
                required = args.required,
                "Waiting for confirmations"
            );
            return Ok(JobOutcome::Snooze(self.poll_interval));
        }

        let webhook_id = self.follow_up(&args, &tx, EventStatus::Completed).await?;
        info!(
            chain = %args.blockchain,
            hash = %args.hash,
            confirmations = tx.confirmations,
            %webhook_id,
            "Transaction confirmed"
        );
        Ok(JobOutcome::Completed)
    }
}

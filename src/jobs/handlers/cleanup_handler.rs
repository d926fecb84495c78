//! Periodic purge of finished jobs and delivered webhooks.
//!
//! The job never completes: each run snoozes itself for the next interval,
//! so its unique key keeps a single instance alive.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::jobs::error::JobError;
use crate::jobs::job::{CleanupArgs, JobKind, JobOutcome, JobRecord, NewJob};
use crate::jobs::queue::JobQueue;
use crate::jobs::worker::JobHandler;
use crate::webhook::WebhookStore;

pub struct CleanupHandler {
    jobs: Arc<dyn JobQueue>,
    webhooks: Arc<dyn WebhookStore>,
    interval: Duration,
    retention: Duration,
}

impl CleanupHandler {
    pub fn new(jobs: Arc<dyn JobQueue>, webhooks: Arc<dyn WebhookStore>, interval: Duration, retention: Duration) -> Self {
        Self {
            jobs,
            webhooks,
            interval,
            retention,
        }
    }

    /// Enqueue the periodic job unless it is already scheduled
    pub async fn schedule(jobs: &dyn JobQueue) -> Result<(), JobError> {
        let job = NewJob::new(JobKind::Cleanup, &CleanupArgs::default())?.unique();
        if let Some(job_id) = jobs.enqueue(&job).await? {
            info!(%job_id, "Cleanup job scheduled");
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for CleanupHandler {
    fn kind(&self) -> JobKind {
        JobKind::Cleanup
    }

    async fn handle(&self, _job: &JobRecord) -> Result<JobOutcome, JobError> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| JobError::permanent(format!("retention out of range: {}", e)))?;
        let before = Utc::now() - retention;

        let jobs = self.jobs.purge_finished(before).await?;
        let webhooks = self.webhooks.purge_sent(before).await?;
        info!(jobs, webhooks, "Cleanup purged finished rows");

        Ok(JobOutcome::Snooze(self.interval))
    }
}

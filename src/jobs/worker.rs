//! Bounded worker pool draining the job queue

use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::error::JobError;
use super::job::{JobKind, JobOutcome, JobRecord};
use super::queue::JobQueue;
use super::retry_backoff::BackoffRetryPolicy;
use crate::config::JobsConfig;
use crate::shutdown::{ShutdownRx, is_shutdown, sleep_or_shutdown};

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn handle(&self, job: &JobRecord) -> Result<JobOutcome, JobError>;
}

/// Runs one claimed job and records its outcome
struct JobExecutor {
    queue: Arc<dyn JobQueue>,
    handlers: FxHashMap<JobKind, Arc<dyn JobHandler>>,
    policy: BackoffRetryPolicy,
    lease: Duration,
}

impl JobExecutor {
    /// Lease renewal period while a handler runs
    fn heartbeat(&self) -> Duration {
        (self.lease / 3).max(Duration::from_millis(100))
    }

    async fn execute(&self, job: JobRecord) {
        let work = async {
            match self.handlers.get(&job.kind) {
                Some(handler) => handler.handle(&job).await,
                None => Err(JobError::NoHandler(job.kind.to_string())),
            }
        };
        tokio::pin!(work);

        let mut heartbeat = tokio::time::interval(self.heartbeat());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = heartbeat.tick() => match self.queue.extend_lease(&job, self.lease).await {
                    Ok(true) => {}
                    Ok(false) => warn!(job_id = %job.job_id, kind = %job.kind, "Job lease lost while running"),
                    Err(e) => warn!(job_id = %job.job_id, kind = %job.kind, error = %e, "Failed to extend job lease"),
                },
            }
        };

        match self.record(&job, result).await {
            Ok(true) => {}
            // another worker owns the job now; its run decides the outcome
            Ok(false) => warn!(job_id = %job.job_id, kind = %job.kind, "Job claim lost, outcome dropped"),
            // Lease expiry hands the job out again
            Err(e) => error!(job_id = %job.job_id, kind = %job.kind, error = %e, "Failed to record job outcome"),
        }
    }

    async fn record(&self, job: &JobRecord, result: Result<JobOutcome, JobError>) -> Result<bool, JobError> {
        match result {
            Ok(JobOutcome::Completed) => {
                debug!(job_id = %job.job_id, kind = %job.kind, "Job completed");
                self.queue.complete(job).await
            }
            Ok(JobOutcome::Snooze(delay)) => {
                debug!(job_id = %job.job_id, kind = %job.kind, delay_ms = delay.as_millis() as u64, "Job snoozed");
                let until = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                self.queue.snooze(job, until).await
            }
            Err(e) => {
                let consumed = job.attempt + 1;
                if e.is_retryable() && consumed < job.max_attempts {
                    let delay = self.policy.backoff_duration(job.attempt.max(0) as usize);
                    warn!(
                        job_id = %job.job_id,
                        kind = %job.kind,
                        attempt = consumed,
                        max_attempts = job.max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Job failed, will retry"
                    );
                    let at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                    self.queue.retry(job, &e.to_string(), at).await
                } else {
                    error!(
                        job_id = %job.job_id,
                        kind = %job.kind,
                        attempt = consumed,
                        error = %e,
                        "Job failed permanently"
                    );
                    self.queue.fail(job, &e.to_string()).await
                }
            }
        }
    }
}

pub struct JobWorkerPool {
    executor: Arc<JobExecutor>,
    workers: usize,
    poll_interval: Duration,
}

impl JobWorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, config: &JobsConfig) -> Self {
        Self {
            executor: Arc::new(JobExecutor {
                queue,
                handlers: FxHashMap::default(),
                policy: BackoffRetryPolicy::from_config(&config.backoff),
                lease: Duration::from_secs(config.lease_secs.max(1)),
            }),
            workers: config.workers.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Register before `run`; a later handler for the same kind replaces the earlier one
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> &mut Self {
        if let Some(executor) = Arc::get_mut(&mut self.executor) {
            executor.handlers.insert(handler.kind(), handler);
        } else {
            warn!(kind = %handler.kind(), "Job pool already running, handler ignored");
        }
        self
    }

    pub async fn run(&self, mut shutdown: ShutdownRx) {
        info!(workers = self.workers, "Job worker pool started");
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks: JoinSet<()> = JoinSet::new();

        while !is_shutdown(&shutdown) {
            while let Some(res) = tasks.try_join_next() {
                if let Err(e) = res {
                    error!(error = %e, "Job task panicked");
                }
            }

            let free = permits.available_permits();
            let mut claimed = 0;
            if free > 0 {
                match self.executor.queue.fetch_due(free as i64, self.executor.lease).await {
                    Ok(jobs) => {
                        claimed = jobs.len();
                        for job in jobs {
                            let Ok(permit) = permits.clone().acquire_owned().await else {
                                break;
                            };
                            let executor = self.executor.clone();
                            tasks.spawn(async move {
                                let _permit = permit;
                                executor.execute(job).await;
                            });
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to fetch due jobs"),
                }
            }

            // Saturated or idle: wait before polling again
            if (claimed == 0 || claimed == free) && sleep_or_shutdown(&mut shutdown, self.poll_interval).await {
                break;
            }
        }

        info!(in_flight = tasks.len(), "Job worker pool stopping, draining in-flight jobs");
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "Job task panicked");
            }
        }
        info!("Job worker pool stopped");
    }

    /// Claim one batch and run it to completion
    pub async fn run_once(&self) -> Result<usize, JobError> {
        let jobs = self.executor.queue.fetch_due(self.workers as i64, self.executor.lease).await?;
        let count = jobs.len();
        let mut tasks = JoinSet::new();
        for job in jobs {
            let executor = self.executor.clone();
            tasks.spawn(async move { executor.execute(job).await });
        }
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "Job task panicked");
            }
        }
        Ok(count)
    }
}

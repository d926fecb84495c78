//! In-memory job queue for tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use super::error::JobError;
use super::job::{JobKind, JobRecord, JobState, NewJob};
use super::queue::{DEFAULT_MAX_ATTEMPTS, JobQueue};

#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<(JobRecord, Option<DateTime<Utc>>)>>,
}

impl MemoryJobQueue {
    pub fn all(&self) -> Vec<JobRecord> {
        self.jobs.lock().unwrap().iter().map(|(j, _)| j.clone()).collect()
    }

    pub fn of_kind(&self, kind: JobKind) -> Vec<JobRecord> {
        self.all().into_iter().filter(|j| j.kind == kind).collect()
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        self.all().into_iter().find(|j| j.job_id == job_id)
    }

    /// Make every available job due now
    pub fn make_all_due(&self) {
        let past = Utc::now() - chrono::Duration::seconds(1);
        for (job, _) in self.jobs.lock().unwrap().iter_mut() {
            if job.state == JobState::Available {
                job.scheduled_at = past;
            }
        }
    }

    /// Expire every running lease, as if its worker stalled
    pub fn expire_leases(&self) {
        let past = Utc::now() - chrono::Duration::seconds(1);
        for (job, lock) in self.jobs.lock().unwrap().iter_mut() {
            if job.state == JobState::Running {
                *lock = Some(past);
            }
        }
    }

    pub fn lease_of(&self, job_id: Uuid) -> Option<DateTime<Utc>> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|(j, _)| j.job_id == job_id)
            .and_then(|(_, lock)| *lock)
    }

    /// Apply `f` if `claim` still holds the job
    fn update_claimed(
        &self,
        claim: &JobRecord,
        f: impl FnOnce(&mut JobRecord, &mut Option<DateTime<Utc>>),
    ) -> Result<bool, JobError> {
        let mut jobs = self.jobs.lock().unwrap();
        let (job, lock) = jobs
            .iter_mut()
            .find(|(j, _)| j.job_id == claim.job_id)
            .ok_or(JobError::NotFound(claim.job_id))?;
        if job.state != JobState::Running || claim.locked_by.is_none() || job.locked_by != claim.locked_by {
            return Ok(false);
        }
        f(job, lock);
        Ok(true)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &NewJob) -> Result<Option<Uuid>, JobError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(key) = &job.unique_key
            && jobs
                .iter()
                .any(|(j, _)| j.unique_key.as_ref() == Some(key) && !j.state.is_final())
        {
            return Ok(None);
        }
        let record = JobRecord {
            job_id: Uuid::new_v4(),
            kind: job.kind,
            args: job.args.clone(),
            unique_key: job.unique_key.clone(),
            state: JobState::Available,
            attempt: 0,
            max_attempts: job.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            scheduled_at: job.scheduled_at.unwrap_or_else(Utc::now),
            last_error: None,
            locked_by: None,
        };
        let id = record.job_id;
        jobs.push((record, None));
        Ok(Some(id))
    }

    async fn fetch_due(&self, limit: i64, lease: Duration) -> Result<Vec<JobRecord>, JobError> {
        let now = Utc::now();
        let until = now + chrono::Duration::milliseconds(lease.as_millis() as i64);
        let mut jobs = self.jobs.lock().unwrap();
        let mut claimed = Vec::new();
        for (job, lock) in jobs.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            let due = match job.state {
                JobState::Available => job.scheduled_at <= now,
                JobState::Running => lock.is_some_and(|l| l < now),
                _ => false,
            };
            if due {
                job.state = JobState::Running;
                job.locked_by = Some(Uuid::new_v4());
                *lock = Some(until);
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn extend_lease(&self, job: &JobRecord, lease: Duration) -> Result<bool, JobError> {
        let until = Utc::now() + chrono::Duration::milliseconds(lease.as_millis() as i64);
        self.update_claimed(job, |_, lock| *lock = Some(until))
    }

    async fn complete(&self, job: &JobRecord) -> Result<bool, JobError> {
        self.update_claimed(job, |job, lock| {
            job.state = JobState::Completed;
            job.locked_by = None;
            *lock = None;
        })
    }

    async fn snooze(&self, job: &JobRecord, until: DateTime<Utc>) -> Result<bool, JobError> {
        self.update_claimed(job, |job, lock| {
            job.state = JobState::Available;
            job.scheduled_at = until;
            job.locked_by = None;
            *lock = None;
        })
    }

    async fn retry(&self, job: &JobRecord, error: &str, at: DateTime<Utc>) -> Result<bool, JobError> {
        self.update_claimed(job, |job, lock| {
            job.state = JobState::Available;
            job.attempt += 1;
            job.last_error = Some(error.to_string());
            job.scheduled_at = at;
            job.locked_by = None;
            *lock = None;
        })
    }

    async fn fail(&self, job: &JobRecord, error: &str) -> Result<bool, JobError> {
        self.update_claimed(job, |job, lock| {
            job.state = JobState::Failed;
            job.attempt += 1;
            job.last_error = Some(error.to_string());
            job.locked_by = None;
            *lock = None;
        })
    }

    async fn purge_finished(&self, _before: DateTime<Utc>) -> Result<u64, JobError> {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|(j, _)| j.state != JobState::Completed);
        Ok((before - jobs.len()) as u64)
    }
}

//! Postgres-backed durable job queue

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use super::error::JobError;
use super::job::{JobRecord, NewJob};
use crate::db::RowExt;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 25;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// `None` when a live job with the same unique key already exists
    async fn enqueue(&self, job: &NewJob) -> Result<Option<Uuid>, JobError>;

    /// Claim due jobs for `lease`; expired leases are claimable again.
    /// Each claim carries a fresh `locked_by` token.
    async fn fetch_due(&self, limit: i64, lease: Duration) -> Result<Vec<JobRecord>, JobError>;

    /// Push the lease of a running claim forward.
    ///
    /// This and every outcome below return `false`, writing nothing, when
    /// `job` no longer holds the claim (its lease expired and the job was
    /// handed to another worker, or it was already finished).
    async fn extend_lease(&self, job: &JobRecord, lease: Duration) -> Result<bool, JobError>;

    async fn complete(&self, job: &JobRecord) -> Result<bool, JobError>;

    /// Reschedule without consuming an attempt
    async fn snooze(&self, job: &JobRecord, until: DateTime<Utc>) -> Result<bool, JobError>;

    /// Consume an attempt and reschedule
    async fn retry(&self, job: &JobRecord, error: &str, at: DateTime<Utc>) -> Result<bool, JobError>;

    /// Consume the final attempt and stop
    async fn fail(&self, job: &JobRecord, error: &str) -> Result<bool, JobError>;

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, JobError>;
}

pub struct PgJobQueue {
    pool: PgPool,
}

const COLUMNS: &str =
    "job_id, kind, args, unique_key, state, attempt, max_attempts, scheduled_at, last_error, locked_by";

/// Outcome updates only apply to the claim that fetched the job
const CLAIMED: &str = "WHERE job_id = $1 AND state = 'running' AND locked_by = $2";

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &PgRow) -> Result<JobRecord, sqlx::Error> {
        Ok(JobRecord {
            job_id: row.try_get("job_id")?,
            kind: row.get_parsed("kind")?,
            args: row.try_get("args")?,
            unique_key: row.try_get("unique_key")?,
            state: row.get_parsed("state")?,
            attempt: row.try_get("attempt")?,
            max_attempts: row.try_get("max_attempts")?,
            scheduled_at: row.try_get("scheduled_at")?,
            last_error: row.try_get("last_error")?,
            locked_by: row.try_get("locked_by")?,
        })
    }
}

/// Enqueue inside a caller-owned transaction.
///
/// A unique key only blocks while the previous job is unfinished; a finished
/// row with the same key is recycled.
pub(crate) async fn enqueue_on(conn: &mut PgConnection, job: &NewJob) -> Result<Option<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        INSERT INTO jobs_tb (job_id, kind, args, unique_key, state, attempt, max_attempts, scheduled_at)
        VALUES ($1, $2, $3, $4, 'available', 0, $5, COALESCE($6, NOW()))
        ON CONFLICT (unique_key) DO UPDATE SET
            job_id = EXCLUDED.job_id,
            args = EXCLUDED.args,
            state = 'available',
            attempt = 0,
            max_attempts = EXCLUDED.max_attempts,
            scheduled_at = EXCLUDED.scheduled_at,
            locked_until = NULL,
            locked_by = NULL,
            last_error = NULL,
            created_at = NOW(),
            finalized_at = NULL
        WHERE jobs_tb.state IN ('completed', 'failed')
        RETURNING job_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(job.kind.as_str())
    .bind(&job.args)
    .bind(&job.unique_key)
    .bind(job.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS))
    .bind(job.scheduled_at)
    .fetch_optional(conn)
    .await
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: &NewJob) -> Result<Option<Uuid>, JobError> {
        let mut conn = self.pool.acquire().await?;
        Ok(enqueue_on(&mut *conn, job).await?)
    }

    async fn fetch_due(&self, limit: i64, lease: Duration) -> Result<Vec<JobRecord>, JobError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE jobs_tb
            SET state = 'running', locked_by = gen_random_uuid(),
                locked_until = NOW() + make_interval(secs => $2)
            WHERE job_id IN (
                SELECT job_id FROM jobs_tb
                WHERE (state = 'available' AND scheduled_at <= NOW())
                   OR (state = 'running' AND locked_until < NOW())
                ORDER BY scheduled_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(limit)
        .bind(lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;
        let mut jobs = rows.iter().map(Self::row_to_job).collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|j| j.scheduled_at);
        Ok(jobs)
    }

    async fn extend_lease(&self, job: &JobRecord, lease: Duration) -> Result<bool, JobError> {
        let sql = format!("UPDATE jobs_tb SET locked_until = NOW() + make_interval(secs => $3) {}", CLAIMED);
        let updated = sqlx::query(&sql)
            .bind(job.job_id)
            .bind(job.locked_by)
            .bind(lease.as_secs_f64())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn complete(&self, job: &JobRecord) -> Result<bool, JobError> {
        let sql = format!(
            "UPDATE jobs_tb SET state = 'completed', locked_until = NULL, locked_by = NULL, finalized_at = NOW() {}",
            CLAIMED
        );
        let updated = sqlx::query(&sql)
            .bind(job.job_id)
            .bind(job.locked_by)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn snooze(&self, job: &JobRecord, until: DateTime<Utc>) -> Result<bool, JobError> {
        let sql = format!(
            "UPDATE jobs_tb SET state = 'available', scheduled_at = $3, locked_until = NULL, locked_by = NULL {}",
            CLAIMED
        );
        let updated = sqlx::query(&sql)
            .bind(job.job_id)
            .bind(job.locked_by)
            .bind(until)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn retry(&self, job: &JobRecord, error: &str, at: DateTime<Utc>) -> Result<bool, JobError> {
        let sql = format!(
            "UPDATE jobs_tb SET state = 'available', attempt = attempt + 1, last_error = $3,
                    scheduled_at = $4, locked_until = NULL, locked_by = NULL {}",
            CLAIMED
        );
        let updated = sqlx::query(&sql)
            .bind(job.job_id)
            .bind(job.locked_by)
            .bind(error)
            .bind(at)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn fail(&self, job: &JobRecord, error: &str) -> Result<bool, JobError> {
        let sql = format!(
            "UPDATE jobs_tb SET state = 'failed', attempt = attempt + 1, last_error = $3,
                    locked_until = NULL, locked_by = NULL, finalized_at = NOW() {}",
            CLAIMED
        );
        let updated = sqlx::query(&sql)
            .bind(job.job_id)
            .bind(job.locked_by)
            .bind(error)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, JobError> {
        let result = sqlx::query("DELETE FROM jobs_tb WHERE state = 'completed' AND finalized_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

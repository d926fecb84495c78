//! Checkpoints and the atomic per-block commit

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::error::ScannerError;
use crate::core_types::Blockchain;
use crate::jobs::job::{JobKind, NewJob, WaitConfirmationsArgs};
use crate::jobs::queue::enqueue_on;
use crate::wallet::WalletUpdate;
use crate::wallet::store::apply_update_on;
use crate::webhook::NewWebhook;
use crate::webhook::store::insert_webhook_on;

/// A webhook plus the confirmation depth its follow-up job waits for
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWebhook {
    pub webhook: NewWebhook,
    pub hash: String,
    pub required_confirmations: u64,
}

/// Everything a processed block writes
#[derive(Debug, Clone, PartialEq)]
pub struct BlockCommit {
    pub blockchain: Blockchain,
    /// Checkpoint the pass started from; the commit only applies on a match
    pub previous: u64,
    pub height: u64,
    pub webhooks: Vec<PendingWebhook>,
    pub wallet_updates: Vec<WalletUpdate>,
    /// Set when the block is skipped as poisoned
    pub skipped_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { webhooks_created: usize },
    /// Another pass moved the checkpoint first; nothing was written
    AlreadyAdvanced,
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn checkpoint(&self, chain: Blockchain) -> Result<Option<u64>, ScannerError>;

    /// Insert the first checkpoint; returns the stored value if one exists
    async fn seed_checkpoint(&self, chain: Blockchain, height: u64) -> Result<u64, ScannerError>;

    async fn commit_block(&self, commit: &BlockCommit) -> Result<CommitOutcome, ScannerError>;
}

pub fn confirmation_job(webhook_id: uuid::Uuid, chain: Blockchain, hash: &str, required: u64) -> Result<NewJob, ScannerError> {
    let args = WaitConfirmationsArgs {
        webhook_id,
        blockchain: chain,
        hash: hash.to_string(),
        required,
    };
    let job = NewJob::new(JobKind::WaitConfirmations, &args)
        .map_err(|e| ScannerError::Webhook(e.into()))?
        .unique();
    Ok(job)
}

pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanStore for PgScanStore {
    async fn checkpoint(&self, chain: Blockchain) -> Result<Option<u64>, ScannerError> {
        let height = sqlx::query_scalar::<_, i64>("SELECT height FROM processed_blocks_tb WHERE blockchain = $1")
            .bind(chain.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(height.map(|h| h as u64))
    }

    async fn seed_checkpoint(&self, chain: Blockchain, height: u64) -> Result<u64, ScannerError> {
        sqlx::query(
            "INSERT INTO processed_blocks_tb (blockchain, height) VALUES ($1, $2)
             ON CONFLICT (blockchain) DO NOTHING",
        )
        .bind(chain.as_str())
        .bind(height as i64)
        .execute(&self.pool)
        .await?;
        self.checkpoint(chain)
            .await?
            .ok_or_else(|| ScannerError::Config(format!("checkpoint for {} vanished", chain)))
    }

    async fn commit_block(&self, commit: &BlockCommit) -> Result<CommitOutcome, ScannerError> {
        let mut tx = self.pool.begin().await?;

        let advanced = sqlx::query(
            "UPDATE processed_blocks_tb SET height = $3, updated_at = NOW()
             WHERE blockchain = $1 AND height = $2",
        )
        .bind(commit.blockchain.as_str())
        .bind(commit.previous as i64)
        .bind(commit.height as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if advanced == 0 {
            tx.rollback().await?;
            return Ok(CommitOutcome::AlreadyAdvanced);
        }

        if let Some(reason) = &commit.skipped_reason {
            sqlx::query(
                "INSERT INTO skipped_blocks_tb (blockchain, height, reason) VALUES ($1, $2, $3)
                 ON CONFLICT (blockchain, height) DO UPDATE SET reason = EXCLUDED.reason",
            )
            .bind(commit.blockchain.as_str())
            .bind(commit.height as i64)
            .bind(reason)
            .execute(&mut *tx)
            .await?;
        }

        let mut webhooks_created = 0;
        for pending in &commit.webhooks {
            let (webhook_id, inserted) = insert_webhook_on(&mut *tx, &pending.webhook).await?;
            if inserted {
                webhooks_created += 1;
            }
            let job = confirmation_job(webhook_id, commit.blockchain, &pending.hash, pending.required_confirmations)?;
            enqueue_on(&mut *tx, &job).await?;
        }

        for update in &commit.wallet_updates {
            if !apply_update_on(&mut *tx, update).await? {
                debug!(chain = %commit.blockchain, address = update.address(), "No hot wallet row for flag update");
            }
        }

        tx.commit().await?;
        Ok(CommitOutcome::Committed { webhooks_created })
    }
}

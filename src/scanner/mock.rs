//! In-memory scan store backed by the webhook and job doubles

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

use super::error::ScannerError;
use super::store::{BlockCommit, CommitOutcome, ScanStore, confirmation_job};
use crate::core_types::Blockchain;
use crate::jobs::mock::MemoryJobQueue;
use crate::jobs::queue::JobQueue;
use crate::wallet::WalletUpdate;
use crate::webhook::WebhookStore;
use crate::webhook::mock::MockWebhookStore;

#[derive(Default)]
pub struct MemoryScanStore {
    // async lock: held across the whole commit like a transaction
    checkpoints: Mutex<HashMap<Blockchain, u64>>,
    pub webhooks: Arc<MockWebhookStore>,
    pub jobs: Arc<MemoryJobQueue>,
    pub skipped: std::sync::Mutex<Vec<(Blockchain, u64, String)>>,
    pub wallet_updates: std::sync::Mutex<Vec<WalletUpdate>>,
    pub advances: AtomicU32,
}

impl MemoryScanStore {
    pub async fn set_checkpoint(&self, chain: Blockchain, height: u64) {
        self.checkpoints.lock().await.insert(chain, height);
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn checkpoint(&self, chain: Blockchain) -> Result<Option<u64>, ScannerError> {
        Ok(self.checkpoints.lock().await.get(&chain).copied())
    }

    async fn seed_checkpoint(&self, chain: Blockchain, height: u64) -> Result<u64, ScannerError> {
        Ok(*self.checkpoints.lock().await.entry(chain).or_insert(height))
    }

    async fn commit_block(&self, commit: &BlockCommit) -> Result<CommitOutcome, ScannerError> {
        let mut checkpoints = self.checkpoints.lock().await;
        if checkpoints.get(&commit.blockchain) != Some(&commit.previous) {
            return Ok(CommitOutcome::AlreadyAdvanced);
        }

        let existing = self.webhooks.all().len();
        for pending in &commit.webhooks {
            let webhook_id = self.webhooks.create(&pending.webhook).await?;
            let job = confirmation_job(webhook_id, commit.blockchain, &pending.hash, pending.required_confirmations)?;
            self.jobs
                .enqueue(&job)
                .await
                .map_err(|e| ScannerError::Config(e.to_string()))?;
        }
        if let Some(reason) = &commit.skipped_reason {
            self.skipped
                .lock()
                .unwrap()
                .push((commit.blockchain, commit.height, reason.clone()));
        }
        self.wallet_updates
            .lock()
            .unwrap()
            .extend(commit.wallet_updates.iter().cloned());

        checkpoints.insert(commit.blockchain, commit.height);
        self.advances.fetch_add(1, Ordering::SeqCst);
        Ok(CommitOutcome::Committed {
            webhooks_created: self.webhooks.all().len() - existing,
        })
    }
}

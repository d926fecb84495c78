//! In-memory transfer store backed by the webhook and job doubles

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::error::TransferError;
use super::store::TransferStore;
use super::types::Transfer;
use crate::core_types::{OwnerId, TransferId};
use crate::jobs::NewJob;
use crate::jobs::mock::MemoryJobQueue;
use crate::jobs::queue::JobQueue;
use crate::webhook::mock::MockWebhookStore;
use crate::webhook::{NewWebhook, WebhookStore};

#[derive(Default)]
pub struct MemoryTransferStore {
    transfers: Mutex<HashMap<TransferId, Transfer>>,
    pub webhooks: Arc<MockWebhookStore>,
    pub jobs: Arc<MemoryJobQueue>,
    pub saves: AtomicU32,
    /// Fail the next save with a database error
    pub fail_next_save: AtomicBool,
}

impl MemoryTransferStore {
    pub fn get(&self, transfer_id: TransferId) -> Option<Transfer> {
        self.transfers.lock().unwrap().get(&transfer_id).cloned()
    }

    /// Overwrite a stored row, bypassing the version check
    pub fn put(&self, transfer: Transfer) {
        self.transfers.lock().unwrap().insert(transfer.transfer_id, transfer);
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn load(&self, transfer_id: TransferId) -> Result<Option<Transfer>, TransferError> {
        Ok(self.get(transfer_id))
    }

    async fn find_by_request_id(
        &self,
        owner_id: OwnerId,
        request_id: &str,
    ) -> Result<Option<Transfer>, TransferError> {
        Ok(self
            .transfers
            .lock()
            .unwrap()
            .values()
            .find(|t| t.owner_id == owner_id && t.request_id.as_deref() == Some(request_id))
            .cloned())
    }

    async fn insert(&self, transfer: &Transfer, job: &NewJob) -> Result<bool, TransferError> {
        {
            let mut transfers = self.transfers.lock().unwrap();
            let duplicate = transfer.request_id.is_some()
                && transfers
                    .values()
                    .any(|t| t.owner_id == transfer.owner_id && t.request_id == transfer.request_id);
            if duplicate {
                return Ok(false);
            }
            transfers.insert(transfer.transfer_id, transfer.clone());
        }
        self.jobs
            .enqueue(job)
            .await
            .map_err(|e| TransferError::DatabaseError(e.to_string()))?;
        Ok(true)
    }

    async fn save(&self, transfer: &Transfer, webhook: Option<&NewWebhook>) -> Result<(), TransferError> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(TransferError::DatabaseError("connection reset".to_string()));
        }
        {
            let mut transfers = self.transfers.lock().unwrap();
            let stored = transfers
                .get(&transfer.transfer_id)
                .ok_or(TransferError::TransferNotFound(transfer.transfer_id))?;
            if stored.version != transfer.version {
                return Err(TransferError::Conflict(transfer.transfer_id));
            }
            let mut saved = transfer.clone();
            saved.version += 1;
            transfers.insert(transfer.transfer_id, saved);
        }
        if let Some(webhook) = webhook {
            self.webhooks.create(webhook).await?;
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

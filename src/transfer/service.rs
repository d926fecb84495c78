//! Transfer creation and operator actions

use std::sync::Arc;
use tracing::info;

use super::engine::TransferEngine;
use super::error::TransferError;
use super::state::TransferStatus;
use super::store::TransferStore;
use super::types::{Transfer, TransferRequest};
use crate::core_types::TransferId;
use crate::jobs::{ContinueTransferArgs, JobKind, NewJob};

pub struct TransferService {
    store: Arc<dyn TransferStore>,
    engine: Arc<TransferEngine>,
}

impl TransferService {
    pub fn new(engine: Arc<TransferEngine>) -> Self {
        Self {
            store: engine.store().clone(),
            engine,
        }
    }

    /// Validate and persist a transfer, enqueueing the job that runs it.
    ///
    /// A request id the owner already used returns the existing transfer.
    pub async fn create(&self, request: TransferRequest) -> Result<Transfer, TransferError> {
        if let Some(request_id) = &request.request_id
            && let Some(existing) = self.store.find_by_request_id(request.owner_id, request_id).await?
        {
            info!(
                transfer_id = %existing.transfer_id,
                request_id = %request_id,
                "Duplicate transfer request"
            );
            return Ok(existing);
        }

        let transfer = Transfer::from_request(&request)?;
        self.engine.validate(&transfer).await?;

        let job = NewJob::new(
            JobKind::ContinueTransferWorkflow,
            &ContinueTransferArgs {
                transfer_id: transfer.transfer_id,
            },
        )?
        .unique();

        if !self.store.insert(&transfer, &job).await? {
            // lost a race with the same request id
            let request_id = request.request_id.as_deref().unwrap_or_default();
            return self
                .store
                .find_by_request_id(request.owner_id, request_id)
                .await?
                .ok_or(TransferError::Conflict(transfer.transfer_id));
        }

        info!(
            transfer_id = %transfer.transfer_id,
            blockchain = %transfer.blockchain,
            kind = %transfer.kind,
            "Transfer created"
        );
        Ok(transfer)
    }

    pub async fn get(&self, transfer_id: TransferId) -> Result<Transfer, TransferError> {
        self.store
            .load(transfer_id)
            .await?
            .ok_or(TransferError::TransferNotFound(transfer_id))
    }

    /// Stop the workflow from touching a live transfer
    pub async fn freeze(&self, transfer_id: TransferId) -> Result<Transfer, TransferError> {
        let mut transfer = self.get(transfer_id).await?;
        if !transfer.status.can_transition_to(TransferStatus::Frozen) {
            return Err(TransferError::InvalidStateTransition(format!(
                "{} -> {}",
                transfer.status,
                TransferStatus::Frozen
            )));
        }
        self.engine.persist(&mut transfer, Some(TransferStatus::Frozen)).await?;
        info!(transfer_id = %transfer_id, "Transfer frozen");
        Ok(transfer)
    }
}

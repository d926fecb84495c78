//! Workflow engine
//!
//! Drives a transfer through its step table, persisting the snapshot
//! before and after every step so a crashed or retried run resumes at the
//! first step that has not completed.
//!
//! Error handling depends on where the workflow is:
//! - before the transaction is sent, a non-retryable error fails the
//!   transfer once (status `failed` plus one `transfer_status` webhook)
//! - retryable errors, and every error after sending, are recorded on the
//!   step and handed back so the job queue retries the run

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::snapshot::{Stage, StepId, StepState};
use super::state::TransferStatus;
use super::store::TransferStore;
use super::types::Transfer;
use super::workflow::{ChainWorkflow, StepContext, StepOutcome, validate_request};
use crate::chain::ChainAdapters;
use crate::config::{ScannerConfig, TransferConfig};
use crate::core_types::{Blockchain, TransferId};
use crate::wallet::WalletResolver;
use crate::webhook::{NewWebhook, TransferStatusPayload, WebhookKind};

/// Where a run left the transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowRun {
    Completed,
    Failed,
    Frozen,
    /// Waiting on the chain; run again after the delay
    Snoozed(Duration),
}

/// Status a transfer moves to when `step` completes
fn status_after(step: StepId) -> Option<TransferStatus> {
    match step {
        StepId::WaitMempool => Some(TransferStatus::InMempool),
        StepId::WaitFirstConfirmation => Some(TransferStatus::Unconfirmed),
        StepId::NotifySuccess => Some(TransferStatus::Completed),
        _ => None,
    }
}

pub struct TransferEngine {
    store: Arc<dyn TransferStore>,
    adapters: ChainAdapters,
    resolver: Arc<WalletResolver>,
    config: TransferConfig,
    confirmations: ScannerConfig,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn TransferStore>,
        adapters: ChainAdapters,
        resolver: Arc<WalletResolver>,
        config: TransferConfig,
        confirmations: ScannerConfig,
    ) -> Self {
        Self {
            store,
            adapters,
            resolver,
            config,
            confirmations,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    fn context(&self, chain: Blockchain) -> StepContext<'_> {
        StepContext {
            adapters: &self.adapters,
            resolver: &self.resolver,
            config: &self.config,
            required_confirmations: self.confirmations.required_confirmations(chain),
        }
    }

    /// Request-time validation, same checks as the first workflow step
    pub async fn validate(&self, transfer: &Transfer) -> Result<(), TransferError> {
        validate_request(transfer, &self.context(transfer.blockchain)).await
    }

    fn status_webhook(transfer: &Transfer) -> Result<NewWebhook, TransferError> {
        let payload = TransferStatusPayload {
            kind: WebhookKind::TransferStatus,
            transfer_id: transfer.transfer_id,
            status: transfer.status,
            step: transfer.snapshot.current_step_name(),
            system_transactions: transfer.system_payloads(),
            error_message: transfer.error_message.clone(),
            request_id: transfer.request_id.clone(),
        };
        Ok(NewWebhook::transfer_status(transfer.owner_id, &payload)?)
    }

    /// Write the transfer back, moving it to `next` with its status webhook
    /// in the same transaction
    pub(crate) async fn persist(
        &self,
        transfer: &mut Transfer,
        next: Option<TransferStatus>,
    ) -> Result<(), TransferError> {
        let expected = transfer.status;
        let webhook = match next {
            Some(next) if next != expected => {
                if !expected.can_transition_to(next) {
                    return Err(TransferError::InvalidStateTransition(format!("{} -> {}", expected, next)));
                }
                transfer.status = next;
                Some(Self::status_webhook(transfer)?)
            }
            _ => None,
        };
        transfer.updated_at = Utc::now();

        if let Err(e) = self.store.save(transfer, webhook.as_ref()).await {
            transfer.status = expected;
            return Err(e);
        }
        transfer.version += 1;
        if webhook.is_some() {
            info!(
                transfer_id = %transfer.transfer_id,
                from = %expected,
                to = %transfer.status,
                "Transfer status changed"
            );
        }
        Ok(())
    }

    /// Run the workflow from where the snapshot left off until it finishes,
    /// fails, or has to wait
    pub async fn run(&self, transfer_id: TransferId) -> Result<WorkflowRun, TransferError> {
        let mut transfer = self
            .store
            .load(transfer_id)
            .await?
            .ok_or(TransferError::TransferNotFound(transfer_id))?;

        match transfer.status {
            TransferStatus::Completed => return Ok(WorkflowRun::Completed),
            TransferStatus::Failed => return Ok(WorkflowRun::Failed),
            TransferStatus::Frozen => {
                debug!(transfer_id = %transfer_id, "Transfer frozen, not running");
                return Ok(WorkflowRun::Frozen);
            }
            TransferStatus::New => self.persist(&mut transfer, Some(TransferStatus::Processing)).await?,
            _ => {}
        }

        let workflow = ChainWorkflow::for_blockchain(transfer.blockchain);
        let ctx = self.context(transfer.blockchain);

        while let Some(stage) = transfer.snapshot.current_stage() {
            let steps = workflow.steps(stage);
            let Some(&step) = steps.get(transfer.snapshot.step) else {
                transfer.snapshot.advance_stage();
                continue;
            };

            {
                let record = transfer.snapshot.record_mut(stage, step);
                record.state = StepState::Running;
                record.attempts += 1;
                record.started_at.get_or_insert_with(Utc::now);
            }
            self.persist(&mut transfer, None).await?;

            match workflow.execute(step, &mut transfer, &ctx).await {
                Ok(StepOutcome::Done) => {
                    {
                        let record = transfer.snapshot.record_mut(stage, step);
                        record.state = StepState::Completed;
                        record.error = None;
                        record.finished_at = Some(Utc::now());
                    }
                    transfer.snapshot.advance_step();
                    if transfer.snapshot.step >= steps.len() {
                        transfer.snapshot.advance_stage();
                    }
                    self.persist(&mut transfer, status_after(step)).await?;
                    debug!(transfer_id = %transfer_id, step = %step, "Step completed");
                }
                Ok(StepOutcome::Snooze(delay)) => {
                    transfer.snapshot.record_mut(stage, step).state = StepState::Pending;
                    self.persist(&mut transfer, None).await?;
                    debug!(
                        transfer_id = %transfer_id,
                        step = %step,
                        delay_secs = delay.as_secs(),
                        "Step not ready, snoozing"
                    );
                    return Ok(WorkflowRun::Snoozed(delay));
                }
                Err(err) => return self.step_failed(transfer, stage, step, err).await,
            }
        }

        if !transfer.status.is_terminal() {
            self.persist(&mut transfer, Some(TransferStatus::Completed)).await?;
        }
        info!(
            transfer_id = %transfer_id,
            tx_hash = transfer.tx_hash.as_deref().unwrap_or_default(),
            "Transfer completed"
        );
        Ok(WorkflowRun::Completed)
    }

    async fn step_failed(
        &self,
        mut transfer: Transfer,
        stage: Stage,
        step: StepId,
        err: TransferError,
    ) -> Result<WorkflowRun, TransferError> {
        {
            let record = transfer.snapshot.record_mut(stage, step);
            record.state = StepState::Failed;
            record.error = Some(err.to_string());
            record.finished_at = Some(Utc::now());
        }

        if stage == Stage::AfterSending || err.is_retryable() {
            warn!(
                transfer_id = %transfer.transfer_id,
                step = %step,
                error = %err,
                "Workflow step failed, will retry"
            );
            if let Err(e) = self.persist(&mut transfer, None).await {
                warn!(transfer_id = %transfer.transfer_id, "Failed to record step error: {}", e);
            }
            return Err(err);
        }

        error!(
            transfer_id = %transfer.transfer_id,
            step = %step,
            code = err.code(),
            "Transfer failed: {}",
            err
        );
        self.mark_failed(&mut transfer, &err).await?;
        Ok(WorkflowRun::Failed)
    }

    async fn mark_failed(&self, transfer: &mut Transfer, err: &TransferError) -> Result<(), TransferError> {
        transfer.snapshot.failed = true;
        transfer.snapshot.error = Some(err.to_string());
        transfer.error_message = Some(err.to_string());
        self.persist(transfer, Some(TransferStatus::Failed)).await
    }

    /// Give up on a transfer whose retries ran out. After sending the
    /// transaction is on its way, so the transfer is left as is.
    pub async fn abandon(&self, transfer_id: TransferId, err: &TransferError) -> Result<(), TransferError> {
        let Some(mut transfer) = self.store.load(transfer_id).await? else {
            return Ok(());
        };
        if transfer.status.is_halted() {
            return Ok(());
        }
        if transfer.snapshot.current_stage() == Some(Stage::AfterSending) {
            warn!(
                transfer_id = %transfer_id,
                error = %err,
                "Retries exhausted after sending, leaving transfer for operators"
            );
            return Ok(());
        }
        error!(transfer_id = %transfer_id, "Retries exhausted, failing transfer: {}", err);
        self.mark_failed(&mut transfer, err).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{MockEvmSdk, MockExplorer, MockTronSdk, MockUtxoSdk};
    use crate::chain::{ExplorerTransaction, Utxo};
    use crate::config::ResolverStrategy;
    use crate::core_types::Blockchain;
    use crate::transfer::mock::MemoryTransferStore;
    use crate::transfer::types::{SystemTxKind, TransferKind, TransferRequest};
    use crate::wallet::mock::MockWalletStore;
    use crate::wallet::{HotWallet, ProcessingWallet};
    use crate::webhook::WebhookRecord;
    use num_bigint::BigUint;
    use rust_decimal::Decimal;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    struct Harness {
        engine: TransferEngine,
        store: Arc<MemoryTransferStore>,
        explorer: Arc<MockExplorer>,
        utxo: Arc<MockUtxoSdk>,
        evm: Arc<MockEvmSdk>,
        tron: Arc<MockTronSdk>,
        wallets: Arc<MockWalletStore>,
        owner: Uuid,
    }

    fn harness() -> Harness {
        let owner = Uuid::new_v4();
        let wallets = Arc::new(MockWalletStore::default());
        for (chain, address) in [
            (Blockchain::Bitcoin, "bc1qa"),
            (Blockchain::Bitcoin, "bc1qb"),
            (Blockchain::Ethereum, "0xaa00000000000000000000000000000000000001"),
            (Blockchain::Tron, "THot1"),
        ] {
            wallets.add_hot(HotWallet {
                blockchain: chain,
                address: address.to_string(),
                owner_id: owner,
                external_id: format!("ext-{}", address),
                sequence: 0,
                is_dirty: false,
                is_activated: true,
            });
        }
        let resolver = Arc::new(WalletResolver::new(wallets.clone(), ResolverStrategy::DatabaseFirst, 16));

        let store = Arc::new(MemoryTransferStore::default());
        let explorer = Arc::new(MockExplorer::new());
        let utxo = Arc::new(MockUtxoSdk::default());
        let evm = Arc::new(MockEvmSdk::default());
        let tron = Arc::new(MockTronSdk::default());
        let adapters = ChainAdapters::new(explorer.clone())
            .with_utxo(utxo.clone())
            .with_evm(evm.clone())
            .with_tron(tron.clone());

        let engine = TransferEngine::new(
            store.clone(),
            adapters,
            resolver,
            TransferConfig::default(),
            ScannerConfig::default(),
        );
        Harness {
            engine,
            store,
            explorer,
            utxo,
            evm,
            tron,
            wallets,
            owner,
        }
    }

    fn request(h: &Harness, chain: Blockchain, from: &[&str], to: &str) -> TransferRequest {
        TransferRequest {
            owner_id: h.owner,
            blockchain: chain,
            kind: TransferKind::Withdrawal,
            from_addresses: from.iter().map(|s| s.to_string()).collect(),
            to_address: to.to_string(),
            asset: None,
            amount: None,
            whole_amount: true,
            max_fee: None,
            fee_rate: None,
            request_id: Some("req-1".to_string()),
        }
    }

    fn insert(h: &Harness, req: &TransferRequest) -> TransferId {
        let transfer = Transfer::from_request(req).unwrap();
        let id = transfer.transfer_id;
        h.store.put(transfer);
        id
    }

    fn utxo(txid: &str, address: &str, value: u64) -> Utxo {
        Utxo {
            txid: txid.to_string(),
            vout: 0,
            value,
            address: address.to_string(),
            confirmations: 3,
        }
    }

    fn on_chain(hash: &str, confirmations: u64) -> ExplorerTransaction {
        ExplorerTransaction {
            hash: hash.to_string(),
            block_height: None,
            confirmations,
            success: true,
            events: vec![],
        }
    }

    fn status_webhooks(h: &Harness) -> Vec<WebhookRecord> {
        h.store.webhooks.of_kind(WebhookKind::TransferStatus)
    }

    fn statuses(h: &Harness) -> Vec<String> {
        status_webhooks(h)
            .iter()
            .map(|w| w.payload["status"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_utxo_whole_balance_single_output() {
        let h = harness();
        // 30 000 + 20 000 sat across two addresses, 10 sat/vB
        h.explorer.set_utxos("bc1qa", vec![utxo("t1", "bc1qa", 30_000)]);
        h.explorer.set_utxos("bc1qb", vec![utxo("t2", "bc1qb", 20_000)]);
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qa", "bc1qb"], "bc1qcold"));

        let run = h.engine.run(id).await.unwrap();
        assert_eq!(run, WorkflowRun::Snoozed(TransferConfig::default().mempool_poll()));

        let requests = h.utxo.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2, "measure once, sign once");
        let final_outputs = &requests[1].outputs;
        assert_eq!(final_outputs.len(), 1, "no change output");
        let fee = MockUtxoSdk::vsize(2, 1) * 10;
        assert_eq!(final_outputs[0].value, 50_000 - fee);
        assert_eq!(final_outputs[0].address, "bc1qcold");

        let transfer = h.store.get(id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Processing);
        assert_eq!(transfer.fee, Some(crate::core_types::from_base_units(fee, 8)));
        assert_eq!(transfer.tx_hash.as_deref(), Some("utxo-hash-1"));
        assert_eq!(h.utxo.broadcasts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_utxo_partial_amount_adds_change() {
        let h = harness();
        h.explorer.set_utxos("bc1qa", vec![utxo("t1", "bc1qa", 100_000)]);
        let mut req = request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qdest");
        req.whole_amount = false;
        req.amount = Some(Decimal::new(4, 4)); // 40 000 sat
        req.fee_rate = Some(5);
        let id = insert(&h, &req);

        h.engine.run(id).await.unwrap();

        let requests = h.utxo.requests.lock().unwrap().clone();
        let outputs = &requests[1].outputs;
        let fee = MockUtxoSdk::vsize(1, 2) * 5;
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].value, 40_000);
        assert_eq!(outputs[1].address, "bc1qa");
        assert_eq!(outputs[1].value, 100_000 - 40_000 - fee);
    }

    #[tokio::test]
    async fn test_resume_reaches_completed_without_rebroadcast() {
        let h = harness();
        h.explorer.set_utxos("bc1qa", vec![utxo("t1", "bc1qa", 80_000)]);
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qcold"));

        assert!(matches!(h.engine.run(id).await.unwrap(), WorkflowRun::Snoozed(_)));

        h.explorer.set_transaction(on_chain("utxo-hash-1", 0));
        assert!(matches!(h.engine.run(id).await.unwrap(), WorkflowRun::Snoozed(_)));
        assert_eq!(h.store.get(id).unwrap().status, TransferStatus::InMempool);

        h.explorer.set_transaction(on_chain("utxo-hash-1", 1));
        assert!(matches!(h.engine.run(id).await.unwrap(), WorkflowRun::Snoozed(_)));
        assert_eq!(h.store.get(id).unwrap().status, TransferStatus::Unconfirmed);

        h.explorer.set_transaction(on_chain("utxo-hash-1", 2));
        assert_eq!(h.engine.run(id).await.unwrap(), WorkflowRun::Completed);

        let transfer = h.store.get(id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Completed);
        assert!(transfer.snapshot.is_finished());
        assert_eq!(h.utxo.broadcasts.lock().unwrap().len(), 1);
        assert_eq!(statuses(&h), vec!["processing", "in_mempool", "unconfirmed", "completed"]);

        // terminal transfers are left alone
        assert_eq!(h.engine.run(id).await.unwrap(), WorkflowRun::Completed);
        assert_eq!(status_webhooks(&h).len(), 4);
    }

    #[tokio::test]
    async fn test_missing_transaction_snoozes_indefinitely() {
        let h = harness();
        h.explorer.set_utxos("bc1qa", vec![utxo("t1", "bc1qa", 80_000)]);
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qcold"));
        h.engine.run(id).await.unwrap();
        h.explorer.set_transaction(on_chain("utxo-hash-1", 0));
        h.engine.run(id).await.unwrap();

        // dropped from the mempool
        h.explorer.remove_transaction("utxo-hash-1");
        for _ in 0..5 {
            let run = h.engine.run(id).await.unwrap();
            assert_eq!(run, WorkflowRun::Snoozed(TransferConfig::default().confirmation_poll()));
        }
        let transfer = h.store.get(id).unwrap();
        assert_eq!(transfer.status, TransferStatus::InMempool);
        assert_eq!(
            transfer.snapshot.record(StepId::WaitFirstConfirmation).unwrap().state,
            StepState::Pending
        );
    }

    #[tokio::test]
    async fn test_business_failure_emits_single_failure_webhook() {
        let h = harness();
        // no UTXOs at all
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qcold"));

        assert_eq!(h.engine.run(id).await.unwrap(), WorkflowRun::Failed);
        assert_eq!(h.engine.run(id).await.unwrap(), WorkflowRun::Failed);

        let transfer = h.store.get(id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Failed);
        assert!(transfer.snapshot.failed);
        assert!(transfer.error_message.unwrap().contains("Insufficient balance"));

        let failed: Vec<_> = status_webhooks(&h)
            .into_iter()
            .filter(|w| w.payload["status"] == "failed")
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload["step"], "select_inputs");
        assert_eq!(failed[0].request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_fee_cap_fails_transfer() {
        let h = harness();
        h.explorer.set_utxos("bc1qa", vec![utxo("t1", "bc1qa", 80_000)]);
        let mut req = request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qcold");
        req.max_fee = Some(Decimal::new(100, 8));
        let id = insert(&h, &req);

        assert_eq!(h.engine.run(id).await.unwrap(), WorkflowRun::Failed);
        assert!(h.utxo.broadcasts.lock().unwrap().is_empty());
        let transfer = h.store.get(id).unwrap();
        assert!(transfer.error_message.unwrap().contains("exceeds limit"));
    }

    #[tokio::test]
    async fn test_transient_error_is_returned_for_retry() {
        let h = harness();
        h.explorer.set_utxos("bc1qa", vec![utxo("t1", "bc1qa", 80_000)]);
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qcold"));
        h.explorer.fail_network.store(true, Ordering::SeqCst);

        let err = h.engine.run(id).await.unwrap_err();
        assert!(err.is_retryable());
        let transfer = h.store.get(id).unwrap();
        assert_eq!(transfer.status, TransferStatus::Processing);
        let record = transfer.snapshot.record(StepId::SelectInputs).unwrap();
        assert_eq!(record.state, StepState::Failed);
        assert!(record.error.is_some());

        // the retry resumes at the failed step
        h.explorer.fail_network.store(false, Ordering::SeqCst);
        assert!(matches!(h.engine.run(id).await.unwrap(), WorkflowRun::Snoozed(_)));
        let transfer = h.store.get(id).unwrap();
        assert_eq!(transfer.snapshot.record(StepId::ValidateRequest).unwrap().attempts, 1);
        assert_eq!(transfer.snapshot.record(StepId::SelectInputs).unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_after_sending_errors_do_not_fail_transfer() {
        let h = harness();
        h.explorer.set_utxos("bc1qa", vec![utxo("t1", "bc1qa", 80_000)]);
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qcold"));
        h.engine.run(id).await.unwrap();

        let mut reverted = on_chain("utxo-hash-1", 1);
        reverted.success = false;
        h.explorer.set_transaction(reverted);
        // wait_mempool passes, wait_first_confirmation sees the failure
        let err = h.engine.run(id).await.unwrap_err();
        assert!(matches!(err, TransferError::Rejected(_)));

        let transfer = h.store.get(id).unwrap();
        assert_eq!(transfer.status, TransferStatus::InMempool);
        assert!(!statuses(&h).contains(&"failed".to_string()));

        // exhausted retries after sending leave the transfer alone
        h.engine.abandon(id, &err).await.unwrap();
        assert_eq!(h.store.get(id).unwrap().status, TransferStatus::InMempool);
    }

    #[tokio::test]
    async fn test_abandon_before_sending_fails_once() {
        let h = harness();
        h.explorer.set_utxos("bc1qa", vec![utxo("t1", "bc1qa", 80_000)]);
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qcold"));
        h.explorer.fail_network.store(true, Ordering::SeqCst);
        let err = h.engine.run(id).await.unwrap_err();

        h.engine.abandon(id, &err).await.unwrap();
        h.engine.abandon(id, &err).await.unwrap();
        assert_eq!(h.store.get(id).unwrap().status, TransferStatus::Failed);
        assert_eq!(statuses(&h).iter().filter(|s| *s == "failed").count(), 1);
    }

    #[tokio::test]
    async fn test_frozen_transfer_is_not_run() {
        let h = harness();
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qcold"));
        let mut transfer = h.store.get(id).unwrap();
        transfer.status = TransferStatus::Frozen;
        h.store.put(transfer);

        assert_eq!(h.engine.run(id).await.unwrap(), WorkflowRun::Frozen);
        assert!(h.utxo.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_source_address_fails_validation() {
        let h = harness();
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qstranger"], "bc1qcold"));
        assert_eq!(h.engine.run(id).await.unwrap(), WorkflowRun::Failed);
        let webhooks = status_webhooks(&h);
        assert_eq!(webhooks.last().unwrap().payload["step"], "validate_request");
    }

    #[tokio::test]
    async fn test_evm_whole_amount_sends_balance_minus_fee() {
        let h = harness();
        let from = "0xaa00000000000000000000000000000000000001";
        let balance = BigUint::from(1_000_000_000_000_000_000u64);
        h.evm.set_balance(from, None, balance.clone());
        let id = insert(&h, &request(&h, Blockchain::Ethereum, &[from], "0xbb"));

        assert!(matches!(h.engine.run(id).await.unwrap(), WorkflowRun::Snoozed(_)));

        let requests = h.evm.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1, "signed once");
        let fee = BigUint::from(21_000u64) * BigUint::from(20_000_000_000u64);
        assert_eq!(requests[0].amount, balance - fee);
        let transfer = h.store.get(id).unwrap();
        assert_eq!(transfer.fee, Some(Decimal::new(42, 5)));
        assert_eq!(transfer.tx_hash.as_deref(), Some("evm-hash-0"));
    }

    #[tokio::test]
    async fn test_evm_insufficient_balance() {
        let h = harness();
        let from = "0xaa00000000000000000000000000000000000001";
        h.evm.set_balance(from, None, BigUint::from(1_000u32));
        let id = insert(&h, &request(&h, Blockchain::Ethereum, &[from], "0xbb"));
        assert_eq!(h.engine.run(id).await.unwrap(), WorkflowRun::Failed);
        assert!(h.evm.broadcasts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tron_delegation_and_reclaim() {
        let h = harness();
        h.wallets.add_processing(ProcessingWallet {
            blockchain: Blockchain::Tron,
            address: "TProc".to_string(),
            owner_id: h.owner,
            sequence: 0,
        });
        h.tron.balance.store(5_000_000, Ordering::SeqCst);
        {
            let mut quote = h.tron.quote.lock().unwrap();
            quote.energy_required = 30_000;
            quote.energy_available = 5_000;
        }
        let mut req = request(&h, Blockchain::Tron, &["THot1"], "TDest");
        req.asset = Some("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string());
        req.whole_amount = false;
        req.amount = Some(Decimal::new(2, 0));
        let id = insert(&h, &req);

        // delegation sent, waiting for it to confirm
        let run = h.engine.run(id).await.unwrap();
        assert_eq!(run, WorkflowRun::Snoozed(TransferConfig::default().delegation_poll()));
        let delegations = h.tron.delegations.lock().unwrap().clone();
        assert_eq!(delegations.len(), 1);
        assert_eq!(delegations[0].from, "TProc");
        assert_eq!(delegations[0].receiver, "THot1");
        assert_eq!(delegations[0].energy, 25_000);

        // still unconfirmed: no second delegation
        h.engine.run(id).await.unwrap();
        assert_eq!(h.tron.delegations.lock().unwrap().len(), 1);

        h.explorer.set_transaction(on_chain("tron-delegate-hash-0", 1));
        assert!(matches!(h.engine.run(id).await.unwrap(), WorkflowRun::Snoozed(_)));
        let transfers = h.tron.transfers.lock().unwrap().clone();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].amount, 2_000_000);

        let hash = h.store.get(id).unwrap().tx_hash.unwrap();
        h.explorer.set_transaction(on_chain(&hash, 19));
        assert_eq!(h.engine.run(id).await.unwrap(), WorkflowRun::Completed);
        assert_eq!(h.tron.reclaims.lock().unwrap().len(), 1);

        let transfer = h.store.get(id).unwrap();
        let kinds: Vec<_> = transfer.system_transactions.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![SystemTxKind::Delegate, SystemTxKind::Reclaim]);
        let completed = status_webhooks(&h).pop().unwrap();
        assert_eq!(completed.payload["status"], "completed");
        assert_eq!(completed.payload["system_transactions"][0]["kind"], "delegate");
        assert_eq!(completed.payload["system_transactions"][0]["status"], "confirmed");
    }

    #[tokio::test]
    async fn test_tron_without_processing_wallet_fails() {
        let h = harness();
        h.tron.balance.store(5_000_000, Ordering::SeqCst);
        h.tron.quote.lock().unwrap().energy_required = 30_000;
        let mut req = request(&h, Blockchain::Tron, &["THot1"], "TDest");
        req.asset = Some("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string());
        let id = insert(&h, &req);
        assert_eq!(h.engine.run(id).await.unwrap(), WorkflowRun::Failed);
        assert!(h.tron.delegations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writer_conflict() {
        let h = harness();
        h.explorer.set_utxos("bc1qa", vec![utxo("t1", "bc1qa", 80_000)]);
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qcold"));
        let mut stale = h.store.get(id).unwrap();
        h.engine.run(id).await.unwrap();

        let err = h.engine.persist(&mut stale, None).await.unwrap_err();
        assert!(matches!(err, TransferError::Conflict(_)));
        assert_eq!(stale.status, TransferStatus::New);
    }

    #[tokio::test]
    async fn test_stale_copy_with_same_status_cannot_revert_progress() {
        let h = harness();
        h.explorer.set_utxos("bc1qa", vec![utxo("t1", "bc1qa", 80_000)]);
        let id = insert(&h, &request(&h, Blockchain::Bitcoin, &["bc1qa"], "bc1qcold"));

        // first run stops in `processing` before anything is signed
        h.explorer.fail_network.store(true, Ordering::SeqCst);
        h.engine.run(id).await.unwrap_err();
        let mut stale = h.store.get(id).unwrap();
        assert_eq!(stale.status, TransferStatus::Processing);

        // another run gets through broadcast, still in `processing`
        h.explorer.fail_network.store(false, Ordering::SeqCst);
        assert!(matches!(h.engine.run(id).await.unwrap(), WorkflowRun::Snoozed(_)));
        let current = h.store.get(id).unwrap();
        assert_eq!(current.status, TransferStatus::Processing);
        assert_eq!(current.tx_hash.as_deref(), Some("utxo-hash-1"));

        let err = h.engine.persist(&mut stale, None).await.unwrap_err();
        assert!(matches!(err, TransferError::Conflict(_)));

        let after = h.store.get(id).unwrap();
        assert_eq!(after.tx_hash.as_deref(), Some("utxo-hash-1"));
        assert_eq!(after.snapshot, current.snapshot);
        assert_eq!(after.version, current.version);

        // and the next run does not broadcast again
        h.engine.run(id).await.unwrap();
        assert_eq!(h.utxo.broadcasts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_status_after_steps() {
        assert_eq!(status_after(StepId::WaitMempool), Some(TransferStatus::InMempool));
        assert_eq!(status_after(StepId::Broadcast), None);
        assert_eq!(status_after(StepId::NotifySuccess), Some(TransferStatus::Completed));
    }
}

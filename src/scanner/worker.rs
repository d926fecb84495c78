//! Per-chain deposit scanner
//!
//! A tip poller publishes the chain head through a watch channel; the block
//! processor walks every height above the checkpoint strictly in order and
//! commits each block's webhooks, confirmation jobs and checkpoint advance
//! in one transaction.

use futures::stream::{self, StreamExt};
use rustc_hash::FxHashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::classifier::{ClassifiedEvent, EventClassifier};
use super::error::ScannerError;
use super::hooks::{PreCommitHook, collect_updates, default_hooks};
use super::store::{BlockCommit, CommitOutcome, PendingWebhook, ScanStore};
use crate::chain::{BlockQuery, Explorer, ExplorerTransaction, with_timeout};
use crate::config::{ChainScanConfig, PoisonBlockPolicy};
use crate::core_types::Blockchain;
use crate::shutdown::{ShutdownRx, is_shutdown, sleep_or_shutdown};
use crate::wallet::WalletResolver;
use crate::webhook::{EventStatus, NewWebhook, event_dedupe_key};

pub struct ScannerWorker {
    chain: Blockchain,
    config: ChainScanConfig,
    required_confirmations: u64,
    explorer: Arc<dyn Explorer>,
    classifier: EventClassifier,
    hooks: Vec<Box<dyn PreCommitHook>>,
    store: Arc<dyn ScanStore>,
    tip: watch::Sender<u64>,
    /// Serializes passes of this worker
    pass_lock: tokio::sync::Mutex<()>,
    /// (height, failed attempts) of the block currently failing to parse
    malformed: Mutex<Option<(u64, u32)>>,
}

impl ScannerWorker {
    pub fn new(
        chain: Blockchain,
        config: ChainScanConfig,
        required_confirmations: u64,
        explorer: Arc<dyn Explorer>,
        resolver: Arc<WalletResolver>,
        store: Arc<dyn ScanStore>,
    ) -> Self {
        let (tip, _) = watch::channel(0);
        Self {
            chain,
            config,
            required_confirmations,
            explorer,
            classifier: EventClassifier::new(resolver),
            hooks: default_hooks(),
            store,
            tip,
            pass_lock: tokio::sync::Mutex::new(()),
            malformed: Mutex::new(None),
        }
    }

    pub fn with_hooks(mut self, hooks: Vec<Box<dyn PreCommitHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn chain(&self) -> Blockchain {
        self.chain
    }

    pub fn subscribe_tip(&self) -> watch::Receiver<u64> {
        self.tip.subscribe()
    }

    /// Run until shutdown, or until a poisoned block halts the chain
    pub async fn run(self: Arc<Self>, shutdown: ShutdownRx) {
        info!(
            chain = %self.chain,
            poll_interval_ms = self.config.poll_interval_ms,
            parallelism = self.config.parallelism,
            "Scanner started"
        );
        tokio::select! {
            _ = self.clone().run_tip_poller(shutdown.clone()) => {}
            _ = self.clone().run_processor(shutdown) => {}
        }
        info!(chain = %self.chain, "Scanner stopped");
    }

    async fn run_tip_poller(self: Arc<Self>, mut shutdown: ShutdownRx) {
        while !is_shutdown(&shutdown) {
            if let Err(e) = self.poll_tip().await {
                warn!(chain = %self.chain, error = %e, "Failed to fetch chain tip");
            }
            if sleep_or_shutdown(&mut shutdown, self.config.poll_interval()).await {
                break;
            }
        }
    }

    async fn run_processor(self: Arc<Self>, mut shutdown: ShutdownRx) {
        let mut tip_rx = self.tip.subscribe();
        while !is_shutdown(&shutdown) {
            match self.process_pending_blocks().await {
                Ok(0) => {}
                Ok(n) => debug!(chain = %self.chain, blocks = n, "Scanner pass finished"),
                Err(e @ ScannerError::PoisonBlock { .. }) => {
                    error!(chain = %self.chain, error = %e, "Scanner halted, operator action required");
                    return;
                }
                Err(e) => {
                    if e.is_transient() || matches!(e, ScannerError::MalformedBlock { .. }) {
                        warn!(chain = %self.chain, error = %e, "Scanner pass failed, retrying");
                    } else {
                        error!(chain = %self.chain, error = %e, "Scanner pass failed");
                    }
                    if sleep_or_shutdown(&mut shutdown, self.config.retry_delay()).await {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                changed = tip_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                stop = sleep_or_shutdown(&mut shutdown, self.config.poll_interval()) => {
                    if stop {
                        break;
                    }
                }
            }
        }
    }

    /// Fetch the chain head and publish it if it moved forward
    pub async fn poll_tip(&self) -> Result<u64, ScannerError> {
        let tip = with_timeout(self.config.request_timeout(), self.explorer.last_block_number(self.chain))
            .await
            .map_err(ScannerError::Explorer)?;
        self.tip.send_if_modified(|current| {
            if tip > *current {
                *current = tip;
                true
            } else {
                false
            }
        });
        Ok(*self.tip.borrow())
    }

    /// Process every block between the checkpoint and the published tip
    pub async fn process_pending_blocks(&self) -> Result<usize, ScannerError> {
        let _pass = self.pass_lock.lock().await;

        let mut tip = *self.tip.borrow();
        if tip == 0 {
            tip = self.poll_tip().await?;
        }

        let mut checkpoint = match self.store.checkpoint(self.chain).await? {
            Some(height) => height,
            None => {
                let seeded = self.store.seed_checkpoint(self.chain, tip.saturating_sub(1)).await?;
                info!(chain = %self.chain, height = seeded, "Checkpoint seeded below chain tip");
                seeded
            }
        };

        let mut processed = 0;
        while checkpoint < tip {
            let height = checkpoint + 1;
            let outcome = match self.process_block(checkpoint, height).await {
                Ok(outcome) => {
                    self.clear_malformed();
                    outcome
                }
                Err(ScannerError::MalformedBlock { height, reason }) => {
                    self.handle_malformed(checkpoint, height, reason).await?
                }
                Err(e) => return Err(e),
            };

            match outcome {
                CommitOutcome::Committed { .. } => {
                    checkpoint = height;
                    processed += 1;
                }
                CommitOutcome::AlreadyAdvanced => {
                    let current = self.store.checkpoint(self.chain).await?.unwrap_or(height);
                    warn!(chain = %self.chain, height, checkpoint = current, "Block already committed by another pass");
                    checkpoint = current;
                }
            }
        }
        Ok(processed)
    }

    /// Classify one block and commit it on top of `previous`
    pub async fn process_block(&self, previous: u64, height: u64) -> Result<CommitOutcome, ScannerError> {
        let txs = with_timeout(
            self.config.request_timeout(),
            self.explorer.find_transactions(self.chain, &BlockQuery::Height(height)),
        )
        .await
        .map_err(|e| ScannerError::from_chain(height, e))?;

        if let Some(bad) = txs.iter().find(|tx| tx.block_height.is_some_and(|h| h != height)) {
            return Err(ScannerError::MalformedBlock {
                height,
                reason: format!("transaction {} reported at height {:?}", bad.hash, bad.block_height),
            });
        }

        let events = self.classify_block(&txs).await?;
        let wallet_updates = collect_updates(&self.hooks, &events);

        let mut webhooks = Vec::with_capacity(events.len());
        for event in &events {
            let key = event_dedupe_key(
                self.chain,
                &event.event.event_key,
                &event.wallet.address,
                EventStatus::WaitingConfirmations,
            );
            webhooks.push(PendingWebhook {
                webhook: NewWebhook::transaction_event(event.wallet.owner_id, &event.payload(), key)?,
                hash: event.hash.clone(),
                required_confirmations: self.required_confirmations,
            });
        }

        let commit = BlockCommit {
            blockchain: self.chain,
            previous,
            height,
            webhooks,
            wallet_updates,
            skipped_reason: None,
        };
        let outcome = self.store.commit_block(&commit).await?;

        if let CommitOutcome::Committed { webhooks_created } = outcome {
            for update in &commit.wallet_updates {
                self.classifier.resolver().cache().apply(update);
            }
            if webhooks_created > 0 {
                info!(
                    chain = %self.chain,
                    height,
                    transactions = txs.len(),
                    webhooks = webhooks_created,
                    "Block committed"
                );
            } else {
                debug!(chain = %self.chain, height, transactions = txs.len(), "Block committed");
            }
        }
        Ok(outcome)
    }

    /// Classify with bounded concurrency, keeping transaction order
    async fn classify_block(&self, txs: &[ExplorerTransaction]) -> Result<Vec<ClassifiedEvent>, ScannerError> {
        let futures: Vec<_> = txs
            .iter()
            .map(|tx| self.classifier.classify_transaction(self.chain, tx))
            .collect();
        let results: Vec<_> = stream::iter(futures)
            .buffered(self.config.parallelism.max(1))
            .collect()
            .await;

        let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
        let mut events = Vec::new();
        for result in results {
            for event in result? {
                if seen.insert((event.event.event_key.clone(), event.wallet.address.clone())) {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }

    async fn handle_malformed(
        &self,
        previous: u64,
        height: u64,
        reason: String,
    ) -> Result<CommitOutcome, ScannerError> {
        let attempts = self.note_malformed(height);
        if attempts < self.config.max_block_retries {
            return Err(ScannerError::MalformedBlock { height, reason });
        }

        match self.config.poison_block_policy {
            PoisonBlockPolicy::Halt => Err(ScannerError::PoisonBlock {
                chain: self.chain,
                height,
                attempts,
            }),
            PoisonBlockPolicy::Skip => {
                error!(chain = %self.chain, height, attempts, reason = %reason, "Skipping poisoned block");
                let commit = BlockCommit {
                    blockchain: self.chain,
                    previous,
                    height,
                    webhooks: Vec::new(),
                    wallet_updates: Vec::new(),
                    skipped_reason: Some(reason),
                };
                let outcome = self.store.commit_block(&commit).await?;
                self.clear_malformed();
                Ok(outcome)
            }
        }
    }

    fn note_malformed(&self, height: u64) -> u32 {
        let mut guard = self.malformed.lock().unwrap_or_else(|e| e.into_inner());
        let attempts = match *guard {
            Some((h, n)) if h == height => n + 1,
            _ => 1,
        };
        *guard = Some((height, attempts));
        attempts
    }

    fn clear_malformed(&self) {
        *self.malformed.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

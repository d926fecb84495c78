//! Per-chain mempool subscription
//!
//! The watch list starts from the resolver's hot addresses and grows with
//! every hot wallet created while the subscription is live. A lagging
//! new-wallet receiver triggers a full reseed.

use futures::StreamExt;
use rustc_hash::FxHashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use super::error::MempoolError;
use crate::chain::{ExplorerTransaction, MempoolFeed, candidate_addresses};
use crate::config::MempoolConfig;
use crate::core_types::Blockchain;
use crate::scanner::EventClassifier;
use crate::shutdown::{ShutdownRx, is_shutdown, sleep_or_shutdown};
use crate::wallet::WalletResolver;
use crate::webhook::{EventStatus, NewWebhook, WebhookStore, event_dedupe_key};

pub struct MempoolWatcher {
    chain: Blockchain,
    feed: Arc<dyn MempoolFeed>,
    classifier: EventClassifier,
    webhooks: Arc<dyn WebhookStore>,
    reconnect_delay: Duration,
    watched: Mutex<FxHashSet<String>>,
}

impl MempoolWatcher {
    pub fn new(
        chain: Blockchain,
        feed: Arc<dyn MempoolFeed>,
        resolver: Arc<WalletResolver>,
        webhooks: Arc<dyn WebhookStore>,
        config: &MempoolConfig,
    ) -> Self {
        Self {
            chain,
            feed,
            classifier: EventClassifier::new(resolver),
            webhooks,
            reconnect_delay: config.reconnect_delay(),
            watched: Mutex::new(FxHashSet::default()),
        }
    }

    pub fn chain(&self) -> Blockchain {
        self.chain
    }

    /// Replace the watch list with the current hot addresses
    pub async fn seed(&self) -> Result<usize, MempoolError> {
        let addresses = self.classifier.resolver().hot_addresses(self.chain).await?;
        let mut watched = FxHashSet::default();
        for address in &addresses {
            watched.extend(candidate_addresses(self.chain, address));
        }
        if let Ok(mut guard) = self.watched.lock() {
            *guard = watched;
        }
        Ok(addresses.len())
    }

    pub fn watch(&self, address: &str) {
        if let Ok(mut watched) = self.watched.lock() {
            watched.extend(candidate_addresses(self.chain, address));
        }
    }

    pub fn is_watched(&self, address: &str) -> bool {
        let Ok(watched) = self.watched.lock() else {
            return false;
        };
        candidate_addresses(self.chain, address)
            .iter()
            .any(|candidate| watched.contains(candidate))
    }

    fn touches_watched(&self, tx: &ExplorerTransaction) -> bool {
        tx.events.iter().any(|event| {
            event.to.as_deref().is_some_and(|a| self.is_watched(a))
                || event.from.as_deref().is_some_and(|a| self.is_watched(a))
        })
    }

    /// Record `in_mempool` webhooks for one unconfirmed transaction.
    ///
    /// Returns the number of events written. Repeats of the same event are
    /// absorbed by the webhook dedupe key.
    pub async fn process_transaction(&self, tx: &ExplorerTransaction) -> Result<usize, MempoolError> {
        if !self.touches_watched(tx) {
            return Ok(0);
        }

        let events = self.classifier.classify_transaction(self.chain, tx).await?;
        let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
        let mut written = 0;
        for event in events {
            if !seen.insert((event.event.event_key.clone(), event.wallet.address.clone())) {
                continue;
            }
            let mut payload = event.payload();
            payload.status = EventStatus::InMempool;
            payload.confirmations = 0;
            let key = event_dedupe_key(
                self.chain,
                &event.event.event_key,
                &event.wallet.address,
                EventStatus::InMempool,
            );
            let webhook = NewWebhook::transaction_event(event.wallet.owner_id, &payload, key)?;
            self.webhooks.create(&webhook).await?;
            written += 1;
        }

        if written > 0 {
            info!(chain = %self.chain, hash = %tx.hash, events = written, "Mempool transaction recorded");
        }
        Ok(written)
    }

    /// Subscribe, consume and resubscribe until shutdown
    pub async fn run(&self, mut shutdown: ShutdownRx) {
        let mut new_wallets = self.classifier.resolver().subscribe_new_wallets();
        info!(chain = %self.chain, "Mempool watcher started");

        while !is_shutdown(&shutdown) {
            match self.seed().await {
                Ok(count) => debug!(chain = %self.chain, addresses = count, "Watch list seeded"),
                Err(e) => {
                    warn!(chain = %self.chain, error = %e, "Failed to seed watch list");
                    if sleep_or_shutdown(&mut shutdown, self.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            }

            let mut stream = match self.feed.subscribe(self.chain).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(chain = %self.chain, error = %e, "Mempool subscription failed");
                    if sleep_or_shutdown(&mut shutdown, self.reconnect_delay).await {
                        break;
                    }
                    continue;
                }
            };
            info!(chain = %self.chain, "Mempool feed subscribed");

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if is_shutdown(&shutdown) {
                            info!(chain = %self.chain, "Mempool watcher stopped");
                            return;
                        }
                    }
                    wallet = new_wallets.recv() => match wallet {
                        Ok(wallet) if wallet.blockchain == self.chain => {
                            debug!(chain = %self.chain, address = %wallet.address, "Watching new hot wallet");
                            self.watch(&wallet.address);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(missed)) => {
                            warn!(chain = %self.chain, missed, "New-wallet events lagged, reseeding");
                            if let Err(e) = self.seed().await {
                                warn!(chain = %self.chain, error = %e, "Reseed failed");
                            }
                        }
                        Err(RecvError::Closed) => {
                            new_wallets = self.classifier.resolver().subscribe_new_wallets();
                        }
                    },
                    item = stream.next() => match item {
                        Some(Ok(tx)) => {
                            if let Err(e) = self.process_transaction(&tx).await {
                                error!(chain = %self.chain, hash = %tx.hash, error = %e, "Failed to record mempool transaction");
                            }
                        }
                        Some(Err(e)) => warn!(chain = %self.chain, error = %e, "Mempool feed error"),
                        None => {
                            warn!(chain = %self.chain, "Mempool feed ended");
                            break;
                        }
                    },
                }
            }

            if sleep_or_shutdown(&mut shutdown, self.reconnect_delay).await {
                break;
            }
        }
        info!(chain = %self.chain, "Mempool watcher stopped");
    }
}

//! Address ownership resolution

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use super::cache::{RefreshOutcome, WalletCache};
use super::error::WalletError;
use super::store::WalletStore;
use super::types::{HotWallet, WalletMatch};
use crate::chain::candidate_addresses;
use crate::config::ResolverStrategy;
use crate::core_types::Blockchain;
use crate::shutdown::ShutdownRx;

pub struct WalletResolver {
    store: Arc<dyn WalletStore>,
    cache: Arc<WalletCache>,
    strategy: ResolverStrategy,
    new_wallets: broadcast::Sender<HotWallet>,
}

impl WalletResolver {
    pub fn new(store: Arc<dyn WalletStore>, strategy: ResolverStrategy, broadcast_capacity: usize) -> Self {
        let (new_wallets, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            store,
            cache: Arc::new(WalletCache::new()),
            strategy,
            new_wallets,
        }
    }

    pub fn store(&self) -> &Arc<dyn WalletStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<WalletCache> {
        &self.cache
    }

    pub fn strategy(&self) -> ResolverStrategy {
        self.strategy
    }

    /// Ownership check for one exact address
    pub async fn check_wallet(
        &self,
        chain: Blockchain,
        address: &str,
    ) -> Result<Option<WalletMatch>, WalletError> {
        match self.strategy {
            ResolverStrategy::CacheFirst => Ok(self.cache.lookup(chain, address)),
            ResolverStrategy::DatabaseFirst => self.check_database(chain, address).await,
        }
    }

    /// Ownership check across every encoding of `address`
    pub async fn resolve(&self, chain: Blockchain, address: &str) -> Result<Option<WalletMatch>, WalletError> {
        for candidate in candidate_addresses(chain, address) {
            if let Some(found) = self.check_wallet(chain, &candidate).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Three sequential lookups: Hot → Processing → Cold
    pub async fn check_database(
        &self,
        chain: Blockchain,
        address: &str,
    ) -> Result<Option<WalletMatch>, WalletError> {
        if let Some(w) = self.store.find_hot(chain, address).await? {
            return Ok(Some(WalletMatch::from(&w)));
        }
        if let Some(w) = self.store.find_processing(chain, address).await? {
            return Ok(Some(WalletMatch::from(&w)));
        }
        Ok(self
            .store
            .find_cold(chain, address)
            .await?
            .map(|w| WalletMatch::from(&w)))
    }

    pub async fn refresh_cache(&self) -> Result<RefreshOutcome, WalletError> {
        self.cache.refresh(self.store.as_ref()).await
    }

    pub async fn run_cache_refresher(&self, interval: Duration, shutdown: ShutdownRx) {
        self.cache
            .clone()
            .run_refresher(self.store.clone(), interval, shutdown)
            .await
    }

    pub fn subscribe_new_wallets(&self) -> broadcast::Receiver<HotWallet> {
        self.new_wallets.subscribe()
    }

    pub(crate) fn publish_new_wallet(&self, wallet: &HotWallet) {
        // No receivers is fine
        if self.new_wallets.send(wallet.clone()).is_err() {
            debug!(chain = %wallet.blockchain, "No subscribers for new hot wallet");
        }
    }

    /// Hot addresses watched on `chain`
    pub async fn hot_addresses(&self, chain: Blockchain) -> Result<Vec<String>, WalletError> {
        match self.strategy {
            ResolverStrategy::CacheFirst => Ok(self.cache.hot_addresses(chain)),
            ResolverStrategy::DatabaseFirst => Ok(self
                .store
                .list_hot()
                .await?
                .into_iter()
                .filter(|w| w.blockchain == chain)
                .map(|w| w.address)
                .collect()),
        }
    }
}

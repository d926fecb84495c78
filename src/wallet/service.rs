//! Wallet write paths. Every mutation writes through to the resolver cache.

use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::info;

use super::error::WalletError;
use super::resolver::WalletResolver;
use super::types::{ColdWallet, HotWallet, ProcessingWallet, WalletUpdate, sequence_scope};
use crate::chain::KeyDeriver;
use crate::core_types::{Blockchain, OwnerId, WalletType};

pub struct WalletService {
    resolver: Arc<WalletResolver>,
    deriver: Arc<dyn KeyDeriver>,
}

impl WalletService {
    pub fn new(resolver: Arc<WalletResolver>, deriver: Arc<dyn KeyDeriver>) -> Self {
        Self { resolver, deriver }
    }

    pub fn resolver(&self) -> &Arc<WalletResolver> {
        &self.resolver
    }

    /// Idempotent per (owner, blockchain, external id).
    ///
    /// EVM chains share one derivation path: a wallet already created for the
    /// same external id on another EVM chain is reused with its address and
    /// sequence.
    pub async fn create_hot_wallet(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
        external_id: &str,
    ) -> Result<HotWallet, WalletError> {
        if external_id.trim().is_empty() {
            return Err(WalletError::Invalid("external_id must not be empty".to_string()));
        }
        let store = self.resolver.store();

        if let Some(existing) = store.find_hot_by_external_id(owner_id, chain, external_id).await? {
            return Ok(existing);
        }

        let shared = if chain.is_evm() {
            store.find_evm_hot_by_external_id(owner_id, external_id).await?
        } else {
            None
        };

        let (address, sequence) = match shared {
            Some(sibling) => (sibling.address, sibling.sequence),
            None => {
                let sequence = store
                    .reserve_sequence(owner_id, sequence_scope(chain), WalletType::Hot)
                    .await?;
                let address = self
                    .deriver
                    .derive_address(chain, WalletType::Hot, owner_id, sequence)
                    .await?;
                (address, sequence)
            }
        };

        let wallet = store
            .insert_hot(&HotWallet {
                blockchain: chain,
                address,
                owner_id,
                external_id: external_id.to_string(),
                sequence,
                is_dirty: false,
                is_activated: !chain.requires_activation(),
            })
            .await?;

        self.resolver.cache().upsert_hot(wallet.clone());
        self.resolver.publish_new_wallet(&wallet);
        info!(
            chain = %chain,
            owner_id = %owner_id,
            sequence = wallet.sequence,
            address = %wallet.address,
            "Hot wallet created"
        );
        Ok(wallet)
    }

    /// At most one per (owner, blockchain); returns the existing one if present
    pub async fn create_processing_wallet(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
    ) -> Result<ProcessingWallet, WalletError> {
        let store = self.resolver.store();
        if let Some(existing) = store.processing_wallet_for_owner(owner_id, chain).await? {
            return Ok(existing);
        }

        let sequence = store
            .reserve_sequence(owner_id, chain.as_str(), WalletType::Processing)
            .await?;
        let address = self
            .deriver
            .derive_address(chain, WalletType::Processing, owner_id, sequence)
            .await?;

        let wallet = store
            .insert_processing(&ProcessingWallet {
                blockchain: chain,
                address,
                owner_id,
                sequence,
            })
            .await?;

        self.resolver.cache().upsert_processing(wallet.clone());
        info!(chain = %chain, owner_id = %owner_id, address = %wallet.address, "Processing wallet created");
        Ok(wallet)
    }

    pub async fn replace_cold_wallets(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
        addresses: Vec<String>,
    ) -> Result<Vec<ColdWallet>, WalletError> {
        let mut addresses = addresses;
        let mut seen = FxHashSet::default();
        addresses.retain(|a| !a.trim().is_empty() && seen.insert(a.clone()));

        let removed = self
            .resolver
            .store()
            .replace_cold(owner_id, chain, &addresses)
            .await?;

        let cache = self.resolver.cache();
        for old in &removed {
            cache.remove_cold(old.blockchain, &old.address);
        }
        let inserted: Vec<ColdWallet> = addresses
            .into_iter()
            .map(|address| ColdWallet {
                blockchain: chain,
                address,
                owner_id,
            })
            .collect();
        for wallet in &inserted {
            cache.upsert_cold(wallet.clone());
        }

        info!(
            chain = %chain,
            owner_id = %owner_id,
            removed = removed.len(),
            added = inserted.len(),
            "Cold wallets replaced"
        );
        Ok(inserted)
    }

    pub async fn mark_dirty(&self, chain: Blockchain, address: &str, dirty: bool) -> Result<(), WalletError> {
        if !self.resolver.store().set_dirty(chain, address, dirty).await? {
            return Err(WalletError::NotFound {
                chain,
                address: address.to_string(),
            });
        }
        self.resolver.cache().set_dirty(chain, address, dirty);
        Ok(())
    }

    pub async fn mark_activated(&self, chain: Blockchain, address: &str) -> Result<(), WalletError> {
        let update = WalletUpdate::MarkActivated {
            blockchain: chain,
            address: address.to_string(),
        };
        if !self.resolver.store().apply_update(&update).await? {
            return Err(WalletError::NotFound {
                chain,
                address: address.to_string(),
            });
        }
        self.resolver.cache().apply(&update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockKeyDeriver;
    use crate::config::ResolverStrategy;
    use crate::wallet::mock::MockWalletStore;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn service() -> (WalletService, Arc<MockWalletStore>, Arc<MockKeyDeriver>) {
        let store = Arc::new(MockWalletStore::default());
        let deriver = Arc::new(MockKeyDeriver::default());
        let resolver = Arc::new(WalletResolver::new(store.clone(), ResolverStrategy::CacheFirst, 16));
        (WalletService::new(resolver, deriver.clone()), store, deriver)
    }

    #[tokio::test]
    async fn test_hot_wallet_sequences_are_monotonic() {
        let (service, _, _) = service();
        let owner = Uuid::new_v4();

        let a = service.create_hot_wallet(owner, Blockchain::Bitcoin, "a").await.unwrap();
        let b = service.create_hot_wallet(owner, Blockchain::Bitcoin, "b").await.unwrap();
        let c = service.create_hot_wallet(owner, Blockchain::Litecoin, "a").await.unwrap();

        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
        assert_eq!(c.sequence, 0);
        assert_ne!(a.address, b.address);
    }

    #[tokio::test]
    async fn test_hot_wallet_is_idempotent_per_external_id() {
        let (service, _, deriver) = service();
        let owner = Uuid::new_v4();

        let first = service.create_hot_wallet(owner, Blockchain::Bitcoin, "a").await.unwrap();
        let again = service.create_hot_wallet(owner, Blockchain::Bitcoin, "a").await.unwrap();

        assert_eq!(first, again);
        assert_eq!(deriver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_evm_chains_share_address_and_sequence() {
        let (service, _, deriver) = service();
        let owner = Uuid::new_v4();

        service.create_hot_wallet(owner, Blockchain::Ethereum, "x").await.unwrap();
        let eth = service.create_hot_wallet(owner, Blockchain::Ethereum, "y").await.unwrap();
        let bsc = service
            .create_hot_wallet(owner, Blockchain::BinanceSmartChain, "y")
            .await
            .unwrap();

        assert_eq!(eth.address, bsc.address);
        assert_eq!(eth.sequence, bsc.sequence);
        assert_eq!(deriver.calls.load(Ordering::SeqCst), 2);

        // next new external id continues the shared sequence
        let z = service.create_hot_wallet(owner, Blockchain::Polygon, "z").await.unwrap();
        assert_eq!(z.sequence, 2);
    }

    #[tokio::test]
    async fn test_new_hot_wallet_is_cached_and_published() {
        let (service, _, _) = service();
        let mut rx = service.resolver().subscribe_new_wallets();
        let owner = Uuid::new_v4();

        let wallet = service.create_hot_wallet(owner, Blockchain::Tron, "t").await.unwrap();
        assert!(!wallet.is_activated);

        let published = rx.recv().await.unwrap();
        assert_eq!(published, wallet);

        let found = service
            .resolver()
            .check_wallet(Blockchain::Tron, &wallet.address)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.wallet_type, WalletType::Hot);
        assert_eq!(found.activated, Some(false));

        service.mark_activated(Blockchain::Tron, &wallet.address).await.unwrap();
        let found = service
            .resolver()
            .check_wallet(Blockchain::Tron, &wallet.address)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.activated, Some(true));
    }

    #[tokio::test]
    async fn test_processing_wallet_single_per_owner() {
        let (service, _, _) = service();
        let owner = Uuid::new_v4();

        let first = service.create_processing_wallet(owner, Blockchain::Tron).await.unwrap();
        let second = service.create_processing_wallet(owner, Blockchain::Tron).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_replace_cold_wallets_updates_cache() {
        let (service, _, _) = service();
        let owner = Uuid::new_v4();
        let resolver = service.resolver().clone();

        service
            .replace_cold_wallets(owner, Blockchain::Bitcoin, vec!["c1".to_string(), "c2".to_string()])
            .await
            .unwrap();
        assert!(resolver.check_wallet(Blockchain::Bitcoin, "c1").await.unwrap().is_some());

        let current = service
            .replace_cold_wallets(owner, Blockchain::Bitcoin, vec!["c3".to_string()])
            .await
            .unwrap();
        assert_eq!(current.len(), 1);
        assert!(resolver.check_wallet(Blockchain::Bitcoin, "c1").await.unwrap().is_none());
        assert!(resolver.check_wallet(Blockchain::Bitcoin, "c3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replace_cold_wallets_drops_repeated_addresses() {
        let (service, _, _) = service();
        let owner = Uuid::new_v4();

        let current = service
            .replace_cold_wallets(
                owner,
                Blockchain::Litecoin,
                vec!["a".to_string(), "b".to_string(), "".to_string(), "a".to_string()],
            )
            .await
            .unwrap();
        let addresses: Vec<_> = current.iter().map(|w| w.address.as_str()).collect();
        assert_eq!(addresses, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_mark_dirty_unknown_wallet() {
        let (service, _, _) = service();
        let err = service.mark_dirty(Blockchain::Bitcoin, "nope", true).await.unwrap_err();
        assert!(matches!(err, WalletError::NotFound { .. }));
    }
}

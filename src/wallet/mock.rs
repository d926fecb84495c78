//! In-memory wallet store for tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::error::WalletError;
use super::store::WalletStore;
use super::types::{ColdWallet, HotWallet, ProcessingWallet, WalletUpdate};
use crate::core_types::{Blockchain, OwnerId, WalletType};

#[derive(Default)]
pub struct MockWalletStore {
    hot: Mutex<Vec<HotWallet>>,
    processing: Mutex<Vec<ProcessingWallet>>,
    cold: Mutex<Vec<ColdWallet>>,
    sequences: Mutex<HashMap<(OwnerId, String, WalletType), i32>>,
    pub fail_listing: AtomicBool,
    pub lookups: AtomicU32,
}

impl MockWalletStore {
    pub fn add_hot(&self, wallet: HotWallet) {
        self.hot.lock().unwrap().push(wallet);
    }

    pub fn add_processing(&self, wallet: ProcessingWallet) {
        self.processing.lock().unwrap().push(wallet);
    }

    pub fn add_cold(&self, wallet: ColdWallet) {
        self.cold.lock().unwrap().push(wallet);
    }

    pub fn hot_snapshot(&self) -> Vec<HotWallet> {
        self.hot.lock().unwrap().clone()
    }

    fn check_listing(&self) -> Result<(), WalletError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            Err(WalletError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WalletStore for MockWalletStore {
    async fn list_hot(&self) -> Result<Vec<HotWallet>, WalletError> {
        self.check_listing()?;
        Ok(self.hot.lock().unwrap().clone())
    }

    async fn list_processing(&self) -> Result<Vec<ProcessingWallet>, WalletError> {
        self.check_listing()?;
        Ok(self.processing.lock().unwrap().clone())
    }

    async fn list_cold(&self) -> Result<Vec<ColdWallet>, WalletError> {
        self.check_listing()?;
        Ok(self.cold.lock().unwrap().clone())
    }

    async fn find_hot(&self, chain: Blockchain, address: &str) -> Result<Option<HotWallet>, WalletError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .hot
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.blockchain == chain && w.address == address)
            .cloned())
    }

    async fn find_processing(
        &self,
        chain: Blockchain,
        address: &str,
    ) -> Result<Option<ProcessingWallet>, WalletError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .processing
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.blockchain == chain && w.address == address)
            .cloned())
    }

    async fn find_cold(&self, chain: Blockchain, address: &str) -> Result<Option<ColdWallet>, WalletError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .cold
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.blockchain == chain && w.address == address)
            .cloned())
    }

    async fn find_hot_by_external_id(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
        external_id: &str,
    ) -> Result<Option<HotWallet>, WalletError> {
        Ok(self
            .hot
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.owner_id == owner_id && w.blockchain == chain && w.external_id == external_id)
            .cloned())
    }

    async fn find_evm_hot_by_external_id(
        &self,
        owner_id: OwnerId,
        external_id: &str,
    ) -> Result<Option<HotWallet>, WalletError> {
        Ok(self
            .hot
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.owner_id == owner_id && w.blockchain.is_evm() && w.external_id == external_id)
            .cloned())
    }

    async fn processing_wallet_for_owner(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
    ) -> Result<Option<ProcessingWallet>, WalletError> {
        Ok(self
            .processing
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.owner_id == owner_id && w.blockchain == chain)
            .cloned())
    }

    async fn reserve_sequence(
        &self,
        owner_id: OwnerId,
        scope: &str,
        wallet_type: WalletType,
    ) -> Result<i32, WalletError> {
        let mut sequences = self.sequences.lock().unwrap();
        let next = sequences.entry((owner_id, scope.to_string(), wallet_type)).or_insert(0);
        let sequence = *next;
        *next += 1;
        Ok(sequence)
    }

    async fn insert_hot(&self, wallet: &HotWallet) -> Result<HotWallet, WalletError> {
        let mut hot = self.hot.lock().unwrap();
        if let Some(existing) = hot.iter().find(|w| {
            w.owner_id == wallet.owner_id && w.blockchain == wallet.blockchain && w.external_id == wallet.external_id
        }) {
            return Ok(existing.clone());
        }
        hot.push(wallet.clone());
        Ok(wallet.clone())
    }

    async fn insert_processing(&self, wallet: &ProcessingWallet) -> Result<ProcessingWallet, WalletError> {
        let mut processing = self.processing.lock().unwrap();
        if let Some(existing) = processing
            .iter()
            .find(|w| w.owner_id == wallet.owner_id && w.blockchain == wallet.blockchain)
        {
            return Ok(existing.clone());
        }
        processing.push(wallet.clone());
        Ok(wallet.clone())
    }

    async fn replace_cold(
        &self,
        owner_id: OwnerId,
        chain: Blockchain,
        addresses: &[String],
    ) -> Result<Vec<ColdWallet>, WalletError> {
        let mut cold = self.cold.lock().unwrap();
        let (removed, kept): (Vec<ColdWallet>, Vec<ColdWallet>) = cold
            .drain(..)
            .partition(|w| w.owner_id == owner_id && w.blockchain == chain);
        *cold = kept;
        cold.extend(addresses.iter().map(|a| ColdWallet {
            blockchain: chain,
            address: a.clone(),
            owner_id,
        }));
        Ok(removed)
    }

    async fn apply_update(&self, update: &WalletUpdate) -> Result<bool, WalletError> {
        let mut hot = self.hot.lock().unwrap();
        match hot
            .iter_mut()
            .find(|w| w.blockchain == update.blockchain() && w.address == update.address())
        {
            Some(wallet) => {
                match update {
                    WalletUpdate::MarkDirty { .. } => wallet.is_dirty = true,
                    WalletUpdate::MarkActivated { .. } => wallet.is_activated = true,
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_dirty(&self, chain: Blockchain, address: &str, dirty: bool) -> Result<bool, WalletError> {
        let mut hot = self.hot.lock().unwrap();
        match hot.iter_mut().find(|w| w.blockchain == chain && w.address == address) {
            Some(wallet) => {
                wallet.is_dirty = dirty;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

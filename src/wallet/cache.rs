//! In-memory mirror of the three wallet tables
//!
//! Written only by `refresh` and by write-through paths. Each entry carries
//! the generation it was written at; a refresh never overwrites or evicts an
//! entry written after the refresh started listing.

use chrono::Utc;
use dashmap::DashMap;
use rustc_hash::FxHashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

use super::error::WalletError;
use super::store::WalletStore;
use super::types::{ColdWallet, HotWallet, ProcessingWallet, WalletMatch, WalletUpdate};
use crate::core_types::Blockchain;
use crate::shutdown::{ShutdownRx, sleep_or_shutdown};

pub type WalletKey = (Blockchain, String);

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed {
        hot: usize,
        processing: usize,
        cold: usize,
    },
    /// Another refresh was already running
    Skipped,
}

/// Resets the in-flight flag even when the refresh future is dropped
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
pub struct WalletCache {
    hot: DashMap<WalletKey, Entry<HotWallet>>,
    processing: DashMap<WalletKey, Entry<ProcessingWallet>>,
    cold: DashMap<WalletKey, Entry<ColdWallet>>,
    generation: AtomicU64,
    refreshing: AtomicBool,
    /// Unix millis of the last completed refresh, 0 if never
    last_refresh_ms: AtomicI64,
}

impl WalletCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hot → Processing → Cold
    pub fn lookup(&self, chain: Blockchain, address: &str) -> Option<WalletMatch> {
        let key = (chain, address.to_string());
        if let Some(e) = self.hot.get(&key) {
            return Some(WalletMatch::from(&e.value));
        }
        if let Some(e) = self.processing.get(&key) {
            return Some(WalletMatch::from(&e.value));
        }
        self.cold.get(&key).map(|e| WalletMatch::from(&e.value))
    }

    pub fn hot_wallet(&self, chain: Blockchain, address: &str) -> Option<HotWallet> {
        self.hot.get(&(chain, address.to_string())).map(|e| e.value.clone())
    }

    pub fn hot_addresses(&self, chain: Blockchain) -> Vec<String> {
        self.hot
            .iter()
            .filter(|e| e.key().0 == chain)
            .map(|e| e.key().1.clone())
            .collect()
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (self.hot.len(), self.processing.len(), self.cold.len())
    }

    pub fn last_refresh_ms(&self) -> Option<i64> {
        match self.last_refresh_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn upsert_hot(&self, wallet: HotWallet) {
        let generation = self.next_generation();
        self.hot.insert(
            (wallet.blockchain, wallet.address.clone()),
            Entry { value: wallet, generation },
        );
    }

    pub fn upsert_processing(&self, wallet: ProcessingWallet) {
        let generation = self.next_generation();
        self.processing.insert(
            (wallet.blockchain, wallet.address.clone()),
            Entry { value: wallet, generation },
        );
    }

    pub fn upsert_cold(&self, wallet: ColdWallet) {
        let generation = self.next_generation();
        self.cold.insert(
            (wallet.blockchain, wallet.address.clone()),
            Entry { value: wallet, generation },
        );
    }

    pub fn remove_cold(&self, chain: Blockchain, address: &str) {
        self.cold.remove(&(chain, address.to_string()));
    }

    /// Write-through for a committed flag change
    pub fn apply(&self, update: &WalletUpdate) {
        let generation = self.next_generation();
        let key = (update.blockchain(), update.address().to_string());
        if let Some(mut entry) = self.hot.get_mut(&key) {
            match update {
                WalletUpdate::MarkDirty { .. } => entry.value.is_dirty = true,
                WalletUpdate::MarkActivated { .. } => entry.value.is_activated = true,
            }
            entry.generation = generation;
        }
    }

    pub fn set_dirty(&self, chain: Blockchain, address: &str, dirty: bool) {
        let generation = self.next_generation();
        if let Some(mut entry) = self.hot.get_mut(&(chain, address.to_string())) {
            entry.value.is_dirty = dirty;
            entry.generation = generation;
        }
    }

    /// Re-list every table and reconcile. Overlapping calls return `Skipped`.
    ///
    /// Any listing error leaves the cache untouched.
    pub async fn refresh(&self, store: &dyn WalletStore) -> Result<RefreshOutcome, WalletError> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Wallet cache refresh already in flight, skipping");
            return Ok(RefreshOutcome::Skipped);
        }
        let _in_flight = InFlight(&self.refreshing);

        let started = self.generation.load(Ordering::Acquire);

        let hot = store.list_hot().await?;
        let processing = store.list_processing().await?;
        let cold = store.list_cold().await?;

        let outcome = RefreshOutcome::Refreshed {
            hot: hot.len(),
            processing: processing.len(),
            cold: cold.len(),
        };

        reconcile(
            &self.hot,
            hot.into_iter().map(|w| ((w.blockchain, w.address.clone()), w)),
            started,
        );
        reconcile(
            &self.processing,
            processing.into_iter().map(|w| ((w.blockchain, w.address.clone()), w)),
            started,
        );
        reconcile(
            &self.cold,
            cold.into_iter().map(|w| ((w.blockchain, w.address.clone()), w)),
            started,
        );

        self.last_refresh_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        debug!(?outcome, "Wallet cache refreshed");
        Ok(outcome)
    }

    pub async fn run_refresher(
        self: Arc<Self>,
        store: Arc<dyn WalletStore>,
        interval: Duration,
        mut shutdown: ShutdownRx,
    ) {
        info!(interval_ms = interval.as_millis() as u64, "Wallet cache refresher started");
        loop {
            if let Err(e) = self.refresh(store.as_ref()).await {
                error!("Wallet cache refresh failed: {}", e);
            }
            if sleep_or_shutdown(&mut shutdown, interval).await {
                break;
            }
        }
        info!("Wallet cache refresher stopped");
    }
}

fn reconcile<K, T>(map: &DashMap<K, Entry<T>>, fresh: impl Iterator<Item = (K, T)>, started: u64)
where
    K: Eq + Hash + Clone,
{
    let mut seen: FxHashSet<K> = FxHashSet::default();
    for (key, value) in fresh {
        seen.insert(key.clone());
        let written_after_start = map.get(&key).map(|e| e.generation > started).unwrap_or(false);
        if !written_after_start {
            map.insert(key, Entry { value, generation: started });
        }
    }
    map.retain(|key, entry| seen.contains(key) || entry.generation > started);
}

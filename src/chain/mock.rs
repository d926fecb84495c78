//! In-memory chain collaborators for tests

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use num_bigint::BigUint;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use super::error::ChainError;
use super::explorer::{Explorer, MempoolFeed, MempoolStream};
use super::sdk::*;
use super::types::*;
use crate::core_types::{Blockchain, OwnerId, WalletType};

#[derive(Default)]
pub struct MockExplorer {
    pub tip: AtomicU64,
    blocks: Mutex<HashMap<u64, Vec<ExplorerTransaction>>>,
    malformed: Mutex<Vec<u64>>,
    transactions: Mutex<HashMap<String, ExplorerTransaction>>,
    utxos: Mutex<HashMap<String, Vec<Utxo>>>,
    pub fail_network: AtomicBool,
    pub find_calls: AtomicU32,
    pub info_calls: AtomicU32,
}

impl MockExplorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, tip: u64) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    pub fn set_block(&self, height: u64, txs: Vec<ExplorerTransaction>) {
        self.blocks.lock().unwrap().insert(height, txs);
    }

    pub fn set_malformed(&self, height: u64) {
        self.malformed.lock().unwrap().push(height);
    }

    pub fn set_transaction(&self, tx: ExplorerTransaction) {
        self.transactions.lock().unwrap().insert(tx.hash.clone(), tx);
    }

    pub fn remove_transaction(&self, hash: &str) {
        self.transactions.lock().unwrap().remove(hash);
    }

    pub fn set_utxos(&self, address: &str, utxos: Vec<Utxo>) {
        self.utxos.lock().unwrap().insert(address.to_string(), utxos);
    }

    fn check_network(&self) -> Result<(), ChainError> {
        if self.fail_network.load(Ordering::SeqCst) {
            Err(ChainError::Network("explorer unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Explorer for MockExplorer {
    async fn last_block_number(&self, _chain: Blockchain) -> Result<u64, ChainError> {
        self.check_network()?;
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn find_transactions(
        &self,
        _chain: Blockchain,
        query: &BlockQuery,
    ) -> Result<Vec<ExplorerTransaction>, ChainError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;
        let BlockQuery::Height(height) = query else {
            return Err(ChainError::Unsupported("hash query".to_string()));
        };
        if self.malformed.lock().unwrap().contains(height) {
            return Err(ChainError::Malformed(format!("block {}", height)));
        }
        Ok(self.blocks.lock().unwrap().get(height).cloned().unwrap_or_default())
    }

    async fn get_transaction_info(
        &self,
        _chain: Blockchain,
        hash: &str,
    ) -> Result<Option<ExplorerTransaction>, ChainError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.check_network()?;
        Ok(self.transactions.lock().unwrap().get(hash).cloned())
    }

    async fn get_utxo(&self, _chain: Blockchain, address: &str) -> Result<Vec<Utxo>, ChainError> {
        self.check_network()?;
        Ok(self.utxos.lock().unwrap().get(address).cloned().unwrap_or_default())
    }

    async fn address_balances(
        &self,
        _chain: Blockchain,
        _address: &str,
    ) -> Result<Vec<AssetBalance>, ChainError> {
        self.check_network()?;
        Ok(Vec::new())
    }
}

/// Build a one-event transaction
pub fn transfer_tx(hash: &str, from: &str, to: &str, amount: rust_decimal::Decimal) -> ExplorerTransaction {
    ExplorerTransaction {
        hash: hash.to_string(),
        block_height: None,
        confirmations: 1,
        success: true,
        events: vec![TransactionEvent {
            event_key: format!("{}:0", hash),
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            amount,
            asset: "BTC".to_string(),
        }],
    }
}

#[derive(Default)]
pub struct MockKeyDeriver {
    pub calls: AtomicU32,
}

#[async_trait]
impl KeyDeriver for MockKeyDeriver {
    async fn derive_address(
        &self,
        chain: Blockchain,
        wallet_type: WalletType,
        owner_id: OwnerId,
        sequence: i32,
    ) -> Result<String, ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scope = if chain.is_evm() { "evm" } else { chain.as_str() };
        Ok(format!("{}-{}-{}-{}", scope, wallet_type, owner_id.simple(), sequence))
    }
}

fn fake_signed(prefix: &str, n: u32, vsize: u64) -> SignedTransaction {
    SignedTransaction {
        hash: format!("{}-hash-{}", prefix, n),
        raw: format!("{}-raw-{}", prefix, n),
        vsize,
    }
}

fn hash_of_raw(raw: &str) -> String {
    raw.replacen("-raw-", "-hash-", 1)
}

/// Virtual size grows with inputs and outputs like a P2WPKH spend
#[derive(Default)]
pub struct MockUtxoSdk {
    pub requests: Mutex<Vec<UtxoBuildRequest>>,
    pub broadcasts: Mutex<Vec<String>>,
    pub reject_broadcast: AtomicBool,
    counter: AtomicU32,
}

impl MockUtxoSdk {
    pub fn vsize(inputs: usize, outputs: usize) -> u64 {
        11 + 68 * inputs as u64 + 31 * outputs as u64
    }
}

#[async_trait]
impl UtxoWalletSdk for MockUtxoSdk {
    async fn build_and_sign(&self, request: &UtxoBuildRequest) -> Result<SignedTransaction, ChainError> {
        self.requests.lock().unwrap().push(request.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(fake_signed(
            "utxo",
            n,
            Self::vsize(request.inputs.len(), request.outputs.len()),
        ))
    }

    async fn broadcast(&self, _chain: Blockchain, raw: &str) -> Result<String, ChainError> {
        if self.reject_broadcast.load(Ordering::SeqCst) {
            return Err(ChainError::Rejected("bad-txns-inputs-missingorspent".to_string()));
        }
        self.broadcasts.lock().unwrap().push(raw.to_string());
        Ok(hash_of_raw(raw))
    }
}

pub struct MockEvmSdk {
    pub gas_limit: u64,
    pub gas_price: BigUint,
    pub balances: Mutex<HashMap<(String, Option<String>), BigUint>>,
    pub requests: Mutex<Vec<EvmTransferRequest>>,
    pub broadcasts: Mutex<Vec<String>>,
    counter: AtomicU32,
}

impl Default for MockEvmSdk {
    fn default() -> Self {
        Self {
            gas_limit: 21_000,
            gas_price: BigUint::from(20_000_000_000u64),
            balances: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
        }
    }
}

impl MockEvmSdk {
    pub fn set_balance(&self, address: &str, asset: Option<&str>, balance: BigUint) {
        self.balances
            .lock()
            .unwrap()
            .insert((address.to_string(), asset.map(str::to_string)), balance);
    }
}

#[async_trait]
impl EvmWalletSdk for MockEvmSdk {
    async fn estimate_fee(
        &self,
        _chain: Blockchain,
        _from: &str,
        _to: &str,
        asset: Option<&str>,
    ) -> Result<EvmFeeQuote, ChainError> {
        let gas_limit = if asset.is_some() { 65_000 } else { self.gas_limit };
        Ok(EvmFeeQuote {
            gas_limit,
            gas_price: self.gas_price.clone(),
        })
    }

    async fn balance(&self, _chain: Blockchain, address: &str, asset: Option<&str>) -> Result<BigUint, ChainError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&(address.to_string(), asset.map(str::to_string)))
            .cloned()
            .unwrap_or_default())
    }

    async fn token_decimals(&self, _chain: Blockchain, _contract: &str) -> Result<u32, ChainError> {
        Ok(6)
    }

    async fn build_and_sign(&self, request: &EvmTransferRequest) -> Result<SignedTransaction, ChainError> {
        self.requests.lock().unwrap().push(request.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(fake_signed("evm", n, 0))
    }

    async fn broadcast(&self, _chain: Blockchain, raw: &str) -> Result<String, ChainError> {
        self.broadcasts.lock().unwrap().push(raw.to_string());
        Ok(hash_of_raw(raw))
    }
}

pub struct MockTronSdk {
    pub quote: Mutex<TronResourceQuote>,
    pub balance: AtomicU64,
    pub delegations: Mutex<Vec<TronDelegation>>,
    pub reclaims: Mutex<Vec<TronDelegation>>,
    pub transfers: Mutex<Vec<TronTransferRequest>>,
    pub broadcasts: Mutex<Vec<String>>,
    counter: AtomicU32,
}

impl Default for MockTronSdk {
    fn default() -> Self {
        Self {
            quote: Mutex::new(TronResourceQuote {
                energy_required: 0,
                energy_available: 0,
                bandwidth_required: 345,
                bandwidth_available: 600,
                burn_fee: 0,
            }),
            balance: AtomicU64::new(0),
            delegations: Mutex::new(Vec::new()),
            reclaims: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
            broadcasts: Mutex::new(Vec::new()),
            counter: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TronWalletSdk for MockTronSdk {
    async fn estimate_resources(
        &self,
        _from: &str,
        _to: &str,
        _asset: Option<&str>,
        _amount: u64,
    ) -> Result<TronResourceQuote, ChainError> {
        Ok(self.quote.lock().unwrap().clone())
    }

    async fn balance(&self, _address: &str, _asset: Option<&str>) -> Result<u64, ChainError> {
        Ok(self.balance.load(Ordering::SeqCst))
    }

    async fn token_decimals(&self, _contract: &str) -> Result<u32, ChainError> {
        Ok(6)
    }

    async fn build_delegation(&self, request: &TronDelegation) -> Result<SignedTransaction, ChainError> {
        self.delegations.lock().unwrap().push(request.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(fake_signed("tron-delegate", n, 0))
    }

    async fn build_reclaim(&self, request: &TronDelegation) -> Result<SignedTransaction, ChainError> {
        self.reclaims.lock().unwrap().push(request.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(fake_signed("tron-reclaim", n, 0))
    }

    async fn build_and_sign(&self, request: &TronTransferRequest) -> Result<SignedTransaction, ChainError> {
        self.transfers.lock().unwrap().push(request.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(fake_signed("tron", n, 0))
    }

    async fn broadcast(&self, raw: &str) -> Result<String, ChainError> {
        self.broadcasts.lock().unwrap().push(raw.to_string());
        Ok(hash_of_raw(raw))
    }
}

/// Feed backed by an unbounded channel; the test keeps the sender
pub struct MockMempoolFeed {
    rx: Mutex<Option<mpsc::UnboundedReceiver<Result<ExplorerTransaction, ChainError>>>>,
}

impl MockMempoolFeed {
    pub fn new() -> (Self, mpsc::UnboundedSender<Result<ExplorerTransaction, ChainError>>) {
        let (tx, rx) = mpsc::unbounded();
        (Self { rx: Mutex::new(Some(rx)) }, tx)
    }
}

#[async_trait]
impl MempoolFeed for MockMempoolFeed {
    async fn subscribe(&self, _chain: Blockchain) -> Result<MempoolStream, ChainError> {
        match self.rx.lock().unwrap().take() {
            Some(rx) => Ok(rx.boxed()),
            None => Err(ChainError::Network("feed already consumed".to_string())),
        }
    }
}

//! REST client for the indexer service
//!
//! Routes, relative to the configured base URL:
//! - `GET /{chain}/blocks/last`                 → `{"height": n}`
//! - `GET /{chain}/blocks/{height}/transactions` → `[ExplorerTransaction]`
//! - `GET /{chain}/blocks/hash/{hash}/transactions`
//! - `GET /{chain}/transactions/{hash}`          → `ExplorerTransaction` or 404
//! - `GET /{chain}/addresses/{address}/utxo`     → `[Utxo]`
//! - `GET /{chain}/addresses/{address}/balances` → `[AssetBalance]`
//! - `GET /{chain}/mempool`                      → `[ExplorerTransaction]`

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use reqwest::StatusCode;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use super::error::ChainError;
use super::explorer::{Explorer, MempoolFeed, MempoolStream};
use super::types::{AssetBalance, BlockQuery, ExplorerTransaction, Utxo};
use crate::config::ExplorerConfig;
use crate::core_types::Blockchain;

#[derive(Debug, Deserialize)]
struct LastBlock {
    height: u64,
}

#[derive(Debug, Clone)]
pub struct HttpExplorer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExplorer {
    pub fn new(config: &ExplorerConfig) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ChainError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, chain: Blockchain, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, chain.as_str(), path)
    }

    /// GET and decode; 404 maps to `Ok(None)`
    async fn get_json<R: DeserializeOwned>(&self, url: String) -> Result<Option<R>, ChainError> {
        debug!(url = %url, "explorer request");
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.bytes().await?;
                serde_json::from_slice(&body)
                    .map(Some)
                    .map_err(|e| ChainError::Malformed(format!("{}: {}", url, e)))
            }
            status if status.is_server_error() => {
                Err(ChainError::Network(format!("{} returned {}", url, status)))
            }
            status => Err(ChainError::Rejected(format!("{} returned {}", url, status))),
        }
    }

    async fn get_required<R: DeserializeOwned>(&self, url: String) -> Result<R, ChainError> {
        let what = url.clone();
        self.get_json(url)
            .await?
            .ok_or_else(|| ChainError::Malformed(format!("{} not found", what)))
    }
}

#[async_trait]
impl Explorer for HttpExplorer {
    async fn last_block_number(&self, chain: Blockchain) -> Result<u64, ChainError> {
        let last: LastBlock = self.get_required(self.url(chain, "blocks/last")).await?;
        Ok(last.height)
    }

    async fn find_transactions(
        &self,
        chain: Blockchain,
        query: &BlockQuery,
    ) -> Result<Vec<ExplorerTransaction>, ChainError> {
        let path = match query {
            BlockQuery::Height(height) => format!("blocks/{}/transactions", height),
            BlockQuery::Hash(hash) => format!("blocks/hash/{}/transactions", hash),
        };
        self.get_required(self.url(chain, &path)).await
    }

    async fn get_transaction_info(
        &self,
        chain: Blockchain,
        hash: &str,
    ) -> Result<Option<ExplorerTransaction>, ChainError> {
        self.get_json(self.url(chain, &format!("transactions/{}", hash)))
            .await
    }

    async fn get_utxo(&self, chain: Blockchain, address: &str) -> Result<Vec<Utxo>, ChainError> {
        let utxo: Option<Vec<Utxo>> = self
            .get_json(self.url(chain, &format!("addresses/{}/utxo", address)))
            .await?;
        Ok(utxo.unwrap_or_default())
    }

    async fn address_balances(
        &self,
        chain: Blockchain,
        address: &str,
    ) -> Result<Vec<AssetBalance>, ChainError> {
        let balances: Option<Vec<AssetBalance>> = self
            .get_json(self.url(chain, &format!("addresses/{}/balances", address)))
            .await?;
        Ok(balances.unwrap_or_default())
    }
}

/// Mempool feed built on periodic `GET /{chain}/mempool` snapshots.
///
/// Each transaction is yielded once while it stays in the mempool; a failed
/// poll is yielded as an error and the next poll continues the stream.
#[derive(Debug, Clone)]
pub struct HttpMempoolFeed {
    explorer: HttpExplorer,
    poll_interval: Duration,
}

impl HttpMempoolFeed {
    pub fn new(explorer: HttpExplorer, poll_interval: Duration) -> Self {
        Self { explorer, poll_interval }
    }
}

struct PollState {
    explorer: HttpExplorer,
    chain: Blockchain,
    poll_interval: Duration,
    seen: FxHashSet<String>,
    ready: VecDeque<ExplorerTransaction>,
    first: bool,
}

/// Transactions of `snapshot` not present in `seen`; `seen` becomes the snapshot's hashes
fn fresh_transactions(seen: &mut FxHashSet<String>, snapshot: Vec<ExplorerTransaction>) -> Vec<ExplorerTransaction> {
    let current: FxHashSet<String> = snapshot.iter().map(|tx| tx.hash.clone()).collect();
    let fresh = snapshot.into_iter().filter(|tx| !seen.contains(&tx.hash)).collect();
    *seen = current;
    fresh
}

#[async_trait]
impl MempoolFeed for HttpMempoolFeed {
    async fn subscribe(&self, chain: Blockchain) -> Result<MempoolStream, ChainError> {
        let state = PollState {
            explorer: self.explorer.clone(),
            chain,
            poll_interval: self.poll_interval,
            seen: FxHashSet::default(),
            ready: VecDeque::new(),
            first: true,
        };

        let stream = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(tx) = state.ready.pop_front() {
                    return Some((Ok(tx), state));
                }
                if !state.first {
                    tokio::time::sleep(state.poll_interval).await;
                }
                state.first = false;

                let url = state.explorer.url(state.chain, "mempool");
                match state.explorer.get_json::<Vec<ExplorerTransaction>>(url).await {
                    Ok(snapshot) => {
                        let fresh = fresh_transactions(&mut state.seen, snapshot.unwrap_or_default());
                        state.ready.extend(fresh);
                    }
                    Err(e) => return Some((Err(e), state)),
                }
            }
        });
        Ok(stream.boxed())
    }
}

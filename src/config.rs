//! Application configuration
//!
//! Loaded from `config/<env>.yaml`. Every section except `database` has
//! defaults so a minimal file only needs logging and the database URL.

use crate::core_types::Blockchain;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Per-target level overrides, e.g. `custody_core::scanner: debug`
    #[serde(default)]
    pub log_targets: BTreeMap<String, String>,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub wallet: WalletCacheConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub mempool: MempoolConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    20
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

/// Indexer service shared by all chains
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExplorerConfig {
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// What the scanner does with a block that keeps failing to parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PoisonBlockPolicy {
    /// Stop the chain's worker and wait for an operator
    #[default]
    Halt,
    /// Record the height in `skipped_blocks` and advance
    Skip,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ScannerConfig {
    #[serde(default)]
    pub chains: BTreeMap<Blockchain, ChainScanConfig>,
}

impl ScannerConfig {
    pub fn enabled_chains(&self) -> impl Iterator<Item = (Blockchain, &ChainScanConfig)> {
        self.chains
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(chain, c)| (*chain, c))
    }

    /// Confirmations a transaction on `chain` needs before it counts as final
    pub fn required_confirmations(&self, chain: Blockchain) -> u64 {
        self.chains
            .get(&chain)
            .and_then(|c| c.required_confirmations)
            .unwrap_or_else(|| default_confirmations(chain))
    }
}

pub fn default_confirmations(chain: Blockchain) -> u64 {
    match chain {
        Blockchain::Bitcoin => 2,
        Blockchain::Litecoin | Blockchain::BitcoinCash | Blockchain::Dogecoin => 6,
        Blockchain::Ethereum => 12,
        Blockchain::BinanceSmartChain => 15,
        Blockchain::Polygon => 64,
        Blockchain::Arbitrum => 20,
        Blockchain::Tron => 19,
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ChainScanConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub retry_delay_ms: u64,
    /// Transactions classified concurrently within one block
    pub parallelism: usize,
    pub max_block_retries: u32,
    pub poison_block_policy: PoisonBlockPolicy,
    pub required_confirmations: Option<u64>,
    pub request_timeout_ms: u64,
}

impl Default for ChainScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 5_000,
            retry_delay_ms: 3_000,
            parallelism: 8,
            max_block_retries: 5,
            poison_block_policy: PoisonBlockPolicy::Halt,
            required_confirmations: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl ChainScanConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// How `check_wallet` resolves addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolverStrategy {
    #[default]
    CacheFirst,
    DatabaseFirst,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WalletCacheConfig {
    pub strategy: ResolverStrategy,
    pub refresh_interval_ms: u64,
    /// Capacity of the new-hot-wallet broadcast channel
    pub broadcast_capacity: usize,
}

impl Default for WalletCacheConfig {
    fn default() -> Self {
        Self {
            strategy: ResolverStrategy::CacheFirst,
            refresh_interval_ms: 30_000,
            broadcast_capacity: 1024,
        }
    }
}

/// Exponential backoff settings shared by jobs and webhook delivery
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            multiplier: 2.0,
            max_ms: 3_600_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
    /// How long a fetched job stays locked before another worker may take it
    pub lease_secs: u64,
    pub max_attempts: i32,
    pub backoff: BackoffConfig,
    pub cleanup_interval_secs: u64,
    pub retention_hours: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            poll_interval_ms: 1_000,
            lease_secs: 300,
            max_attempts: 25,
            backoff: BackoffConfig::default(),
            cleanup_interval_secs: 3_600,
            retention_hours: 168,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WebhookConfig {
    pub interval_ms: u64,
    /// Correlation groups delivered concurrently
    pub concurrency: usize,
    pub batch_size: i64,
    pub timeout_ms: u64,
    pub backoff: BackoffConfig,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            concurrency: 16,
            batch_size: 200,
            timeout_ms: 10_000,
            backoff: BackoffConfig {
                initial_ms: 5_000,
                multiplier: 2.0,
                max_ms: 1_800_000,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransferConfig {
    /// Fee rate in sat/vB when the request carries none
    pub fee_rates: BTreeMap<Blockchain, u64>,
    pub default_fee_rate: u64,
    pub dust_limit_sats: u64,
    pub mempool_poll_secs: u64,
    pub confirmation_poll_secs: u64,
    /// Delay between checks of a pending resource delegation
    pub delegation_poll_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fee_rates: BTreeMap::new(),
            default_fee_rate: 10,
            dust_limit_sats: 546,
            mempool_poll_secs: 10,
            confirmation_poll_secs: 30,
            delegation_poll_secs: 6,
        }
    }
}

impl TransferConfig {
    pub fn fee_rate(&self, chain: Blockchain) -> u64 {
        self.fee_rates
            .get(&chain)
            .copied()
            .unwrap_or(self.default_fee_rate)
    }

    pub fn mempool_poll(&self) -> Duration {
        Duration::from_secs(self.mempool_poll_secs)
    }

    pub fn confirmation_poll(&self) -> Duration {
        Duration::from_secs(self.confirmation_poll_secs)
    }

    pub fn delegation_poll(&self) -> Duration {
        Duration::from_secs(self.delegation_poll_secs)
    }
}

/// Unconfirmed-transaction watcher for chains with a mempool feed
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MempoolConfig {
    pub enabled: bool,
    /// Interval between mempool snapshots fetched from the indexer
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 2_000,
            reconnect_delay_ms: 5_000,
        }
    }
}

impl MempoolConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let yaml = r#"
log_level: "info"
log_dir: "./logs"
log_file: "custody.log"
use_json: false
rotation: "daily"
database:
  url: "postgres://localhost/custody"
"#;

        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.wallet.strategy, ResolverStrategy::CacheFirst);
        assert_eq!(config.jobs.workers, 16);
        assert!(config.scanner.chains.is_empty());
        assert_eq!(config.transfer.fee_rate(Blockchain::Bitcoin), 10);
        assert!(config.mempool.enabled);
        assert_eq!(config.mempool.reconnect_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_scanner_chains_deserialize() {
        let yaml = r#"
chains:
  bitcoin:
    poll_interval_ms: 1000
    required_confirmations: 3
    poison_block_policy: skip
  ethereum:
    enabled: false
  bsc:
    parallelism: 4
"#;

        let config: ScannerConfig = serde_yaml::from_str(yaml).unwrap();

        let btc = &config.chains[&Blockchain::Bitcoin];
        assert!(btc.enabled);
        assert_eq!(btc.poll_interval_ms, 1000);
        assert_eq!(btc.poison_block_policy, PoisonBlockPolicy::Skip);
        assert_eq!(config.required_confirmations(Blockchain::Bitcoin), 3);
        assert_eq!(config.required_confirmations(Blockchain::Tron), 19);

        let enabled: Vec<Blockchain> = config.enabled_chains().map(|(c, _)| c).collect();
        assert_eq!(enabled, vec![Blockchain::Bitcoin, Blockchain::BinanceSmartChain]);
        assert_eq!(config.chains[&Blockchain::BinanceSmartChain].parallelism, 4);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = AppConfig::from_file("config/does-not-exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

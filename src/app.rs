//! Process wiring: stores, resolver, transfer engine and background loops
//!
//! ```text
//! scanners ─┐                         ┌─▶ job workers ─▶ transfer engine
//! mempool  ─┼─▶ webhooks_tb + jobs_tb ┤
//!           │                         └─▶ webhook dispatcher ─▶ merchants
//! cache refresher ─▶ wallet cache
//! ```

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::chain::{
    ChainAdapters, ChainError, EvmWalletSdk, HttpExplorer, HttpMempoolFeed, KeyDeriver, TronWalletSdk,
    UtxoWalletSdk,
};
use crate::config::{AppConfig, ResolverStrategy};
use crate::db::Database;
use crate::db::schema::init_schema;
use crate::jobs::{
    CleanupHandler, ConfirmationHandler, JobError, JobQueue, JobWorkerPool, PgJobQueue, TransferHandler,
};
use crate::mempool::MempoolWatcher;
use crate::scanner::{PgScanStore, ScannerWorker};
use crate::shutdown::Shutdown;
use crate::transfer::{PgTransferStore, TransferEngine, TransferService};
use crate::wallet::{PgWalletStore, WalletError, WalletResolver, WalletService};
use crate::webhook::{HttpWebhookSender, PgWebhookStore, WebhookDispatcher, WebhookError, WebhookStore};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain adapter error: {0}")]
    Chain(#[from] ChainError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Signing collaborators; a family left `None` cannot send transfers
#[derive(Clone, Default)]
pub struct WalletSdks {
    pub utxo: Option<Arc<dyn UtxoWalletSdk>>,
    pub evm: Option<Arc<dyn EvmWalletSdk>>,
    pub tron: Option<Arc<dyn TronWalletSdk>>,
}

pub struct App {
    config: AppConfig,
    db: Database,
    explorer: Arc<HttpExplorer>,
    resolver: Arc<WalletResolver>,
    webhooks: Arc<dyn WebhookStore>,
    jobs: Arc<dyn JobQueue>,
    engine: Arc<TransferEngine>,
    transfers: Arc<TransferService>,
}

impl App {
    /// Connect, create the schema and build every shared component
    pub async fn bootstrap(config: AppConfig, sdks: WalletSdks) -> Result<Self, AppError> {
        let db = Database::connect(&config.database).await?;
        init_schema(db.pool()).await?;

        let explorer = Arc::new(HttpExplorer::new(&config.explorer)?);
        let resolver = Arc::new(WalletResolver::new(
            Arc::new(PgWalletStore::new(db.pool().clone())),
            config.wallet.strategy,
            config.wallet.broadcast_capacity,
        ));
        if config.wallet.strategy == ResolverStrategy::CacheFirst {
            let outcome = resolver.refresh_cache().await?;
            info!(?outcome, "Wallet cache warmed");
        }

        let webhooks: Arc<dyn WebhookStore> = Arc::new(PgWebhookStore::new(db.pool().clone()));
        let jobs: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(db.pool().clone()));

        let mut adapters = ChainAdapters::new(explorer.clone());
        adapters.utxo = sdks.utxo;
        adapters.evm = sdks.evm;
        adapters.tron = sdks.tron;
        adapters.request_timeout = Duration::from_millis(config.explorer.timeout_ms);

        let engine = Arc::new(TransferEngine::new(
            Arc::new(PgTransferStore::new(db.pool().clone())),
            adapters,
            resolver.clone(),
            config.transfer.clone(),
            config.scanner.clone(),
        ));
        let transfers = Arc::new(TransferService::new(engine.clone()));

        Ok(Self {
            config,
            db,
            explorer,
            resolver,
            webhooks,
            jobs,
            engine,
            transfers,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<WalletResolver> {
        &self.resolver
    }

    pub fn transfers(&self) -> &Arc<TransferService> {
        &self.transfers
    }

    /// Wallet creation needs a key deriver supplied by the host
    pub fn wallet_service(&self, deriver: Arc<dyn KeyDeriver>) -> WalletService {
        WalletService::new(self.resolver.clone(), deriver)
    }

    /// Spawn every background loop and wait until all of them stop
    pub async fn run(&self, shutdown: &Shutdown) -> Result<(), AppError> {
        self.db.health_check().await?;
        let mut tasks = JoinSet::new();

        for (chain, chain_config) in self.config.scanner.enabled_chains() {
            let worker = Arc::new(ScannerWorker::new(
                chain,
                chain_config.clone(),
                self.config.scanner.required_confirmations(chain),
                self.explorer.clone(),
                self.resolver.clone(),
                Arc::new(PgScanStore::new(self.db.pool().clone())),
            ));
            tasks.spawn(worker.run(shutdown.subscribe()));
        }

        if self.config.mempool.enabled {
            let feed = Arc::new(HttpMempoolFeed::new(
                (*self.explorer).clone(),
                self.config.mempool.poll_interval(),
            ));
            for (chain, _) in self.config.scanner.enabled_chains() {
                if !chain.has_mempool_feed() {
                    continue;
                }
                let watcher = MempoolWatcher::new(
                    chain,
                    feed.clone(),
                    self.resolver.clone(),
                    self.webhooks.clone(),
                    &self.config.mempool,
                );
                let rx = shutdown.subscribe();
                tasks.spawn(async move { watcher.run(rx).await });
            }
        }

        let sender = Arc::new(HttpWebhookSender::new(Duration::from_millis(self.config.webhook.timeout_ms))?);
        let dispatcher = WebhookDispatcher::new(self.webhooks.clone(), sender, self.config.webhook.clone());
        let rx = shutdown.subscribe();
        tasks.spawn(async move { dispatcher.run(rx).await });

        let mut pool = JobWorkerPool::new(self.jobs.clone(), &self.config.jobs);
        pool.register(Arc::new(ConfirmationHandler::new(
            self.explorer.clone(),
            self.webhooks.clone(),
            self.config.transfer.confirmation_poll(),
            Duration::from_millis(self.config.explorer.timeout_ms),
        )))
        .register(Arc::new(TransferHandler::new(self.engine.clone())))
        .register(Arc::new(CleanupHandler::new(
            self.jobs.clone(),
            self.webhooks.clone(),
            Duration::from_secs(self.config.jobs.cleanup_interval_secs),
            Duration::from_secs(self.config.jobs.retention_hours * 3_600),
        )));
        CleanupHandler::schedule(self.jobs.as_ref()).await?;
        let rx = shutdown.subscribe();
        tasks.spawn(async move { pool.run(rx).await });

        if self.config.wallet.strategy == ResolverStrategy::CacheFirst {
            let resolver = self.resolver.clone();
            let interval = Duration::from_millis(self.config.wallet.refresh_interval_ms);
            let rx = shutdown.subscribe();
            tasks.spawn(async move { resolver.run_cache_refresher(interval, rx).await });
        }

        info!(tasks = tasks.len(), "Background tasks started");

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Background task aborted");
                if !shutdown.is_triggered() {
                    warn!("Stopping remaining tasks");
                    shutdown.trigger();
                }
            }
        }
        info!("All background tasks stopped");
        Ok(())
    }
}

//! custody_core service entry point
//!
//! ```text
//! custody_core [--env|-e <name>]    loads config/<name>.yaml (default: dev)
//! ```
//!
//! Signing SDKs and key derivation are supplied by the embedding host; this
//! binary runs scanning, mempool watching, jobs and webhook delivery, and
//! rejects transfers for families without an SDK.

use anyhow::Context;
use tracing::{error, info};

use custody_core::app::{App, WalletSdks};
use custody_core::config::AppConfig;
use custody_core::logging::init_logging;
use custody_core::shutdown::Shutdown;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).with_context(|| format!("loading config for env '{}'", env))?;
    let _log_guard = init_logging(&config);

    info!(env = %env, git = env!("GIT_HASH"), "Starting custody_core");

    let app = App::bootstrap(config, WalletSdks::default())
        .await
        .context("bootstrapping application")?;

    let shutdown = std::sync::Arc::new(Shutdown::new());
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!(error = %e, "Failed to listen for ctrl-c, shutting down"),
        }
        signal.trigger();
    });

    app.run(&shutdown).await.context("running background tasks")?;
    info!("custody_core stopped");
    Ok(())
}

// Wallet service worker host
//
// Runs the background context natively:
// 1. Serves SERVICE_WORKER messages (dApp requests, pings, window events)
// 2. Keeps the approval queue in a JSON file store
// 3. Watches submitted transactions until they settle

mod config;
mod surface;
mod watcher;

use anyhow::{Context, Result};
use gas_sponsor_client::{should_use_sponsored_gas, RpcClient};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wallet_extension_core::{
    FileStore, KeepAlive, KeyValueStore, LocalHub, MessageRouter, RequestQueue, ServiceWorker,
    Transport, TxTracker,
};

use crate::config::ConfigFile;
use crate::surface::HeadlessSurface;
use crate::watcher::TxWatcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "wallet_service_worker=info,wallet_extension_core=info,gas_sponsor_client=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "service-worker.toml".to_string());

    tracing::info!("Loading configuration from: {}", config_path);

    let config = ConfigFile::load(&config_path)?;

    tracing::info!("🚀 Starting wallet service worker");
    tracing::info!("Store: {}", config.storage.path.display());

    if should_use_sponsored_gas(config.sponsor.enabled, config.sponsor.gas_budget) {
        tracing::info!(
            "Gas sponsorship via {} (budget {})",
            config.sponsor.base_url,
            config.sponsor.effective_gas_budget()
        );
    } else {
        tracing::info!("Gas sponsorship disabled, transactions use user gas");
    }

    if let Some(dir) = config.storage.path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .context(format!("Failed to create storage directory: {}", dir.display()))?;
        }
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(config.storage.path.clone()));
    let hub = Arc::new(LocalHub::new());
    let transport: Arc<dyn Transport> = Arc::new(MessageRouter::new(
        hub.clone(),
        config.transport.origin_filter.clone(),
        config.transport.timeout(),
    ));

    let queue = Arc::new(RequestQueue::new(
        store.clone(),
        Arc::new(HeadlessSurface::default()),
    ));
    let pending = queue.len().await.context("Failed to read request queue")?;
    if pending > 0 {
        tracing::info!("Resuming with {} pending request(s)", pending);
    }

    let worker = Arc::new(ServiceWorker::new(queue, store.clone(), transport.clone()));
    let worker_task = tokio::spawn(worker.run(hub.register_runtime()));

    let keepalive = KeepAlive::new("native-host", transport, config.keepalive.interval());

    let watcher = TxWatcher::new(
        TxTracker::new(store),
        RpcClient::new(config.watcher.rpc_timeout()),
        config.endpoints.clone(),
    );
    let watcher_task = tokio::spawn(watcher.run(config.watcher.poll_interval()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down");
    keepalive.disconnect();
    watcher_task.abort();
    worker_task.abort();

    Ok(())
}

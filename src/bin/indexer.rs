use anyhow::{Context, Result};
use contract_indexer::config::Config;
use contract_indexer::emitter::{ProgressEmitter, spawn_log_listener};
use contract_indexer::indexer::Indexer;
use contract_indexer::registry::ContractRegistry;
use contract_indexer::repository::SqliteStore;
use contract_indexer::rpc::RpcClient;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting contract event indexer");

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );

    let store = Arc::new(
        SqliteStore::open(&config.database_url).context("Failed to open the database")?,
    );
    info!("Database initialized");

    let client = Arc::new(RpcClient::new(
        &config.json_rpc_urls,
        config.request_timeout,
        config.poll_interval,
    )?);
    info!("RPC client connected");

    let registry = Arc::new(ContractRegistry::new(store.clone()));
    registry.load_persisted().await?;
    registry.add_bindings(config.load_contracts()?).await?;
    if registry.is_empty() {
        info!("No contracts registered; only blocks and transactions will be indexed");
    }

    let emitter = ProgressEmitter::new();
    let _listener = spawn_log_listener(&emitter);

    let indexer = Indexer::new(
        config.indexer_config(),
        client,
        store,
        registry,
        emitter,
    );

    let runner = indexer.clone();
    let mut start = tokio::spawn(async move { runner.start().await });

    let backfilling = tokio::select! {
        result = &mut start => {
            match result {
                Ok(Ok(())) => info!("Indexer is live, press Ctrl-C to stop"),
                Ok(Err(e)) => {
                    error!("Indexer error: {}", e);
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
            tokio::signal::ctrl_c().await?;
            false
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested during backfill");
            true
        }
    };

    indexer.stop().await;
    if backfilling {
        info!("Waiting for the current range to finish...");
        match start.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Indexer error during shutdown: {}", e),
            Err(e) => error!("Indexer task failed: {}", e),
        }
    }
    Ok(())
}

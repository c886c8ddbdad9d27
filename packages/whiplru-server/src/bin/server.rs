//! `whiplru-server` binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use whiplru_server::config::ServerConfig;
use whiplru_server::network::NetworkModule;
use whiplru_server::storage::{
    NegativeCache, NullUpstream, PartitionManager, RecencyIndex, StorageManager, WriteForwardLog,
};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let config = Arc::new(ServerConfig::parse());

    if let Err(err) = run(config).await {
        error!(%err, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(config: Arc<ServerConfig>) -> anyhow::Result<()> {
    let index = Arc::new(RecencyIndex::new());
    let partitions = PartitionManager::open(
        config.local_storage_root.clone(),
        config.local_storage_max_bytes,
        config.partition_interval(),
        index.clone(),
    )?;
    let negative_cache = NegativeCache::new(config.negative_cache_ttl());
    let write_forward = WriteForwardLog::open(&config.write_cache_path, config.write_cache_slot_count)?;

    let storage = Arc::new(StorageManager::new(
        partitions,
        index,
        negative_cache,
        write_forward,
        Arc::new(NullUpstream),
        config.local_storage_max_bytes,
    ));

    info!("replaying any writes pending from a previous crash");
    storage.recover_pending_writes().await;

    let mut network = NetworkModule::new(Arc::clone(&config), Arc::clone(&storage));
    let port = network.start().await?;
    info!(port, "whiplru-server ready");

    let housekeeping_storage = Arc::clone(&storage);
    let housekeeping = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            if let Err(err) = housekeeping_storage.run_housekeeping_tick() {
                tracing::warn!(%err, "housekeeping tick failed");
            }
        }
    });

    network.serve(shutdown_signal()).await?;
    housekeeping.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

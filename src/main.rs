use clap::Parser;
use ferrumkv::config::Cli;
use ferrumkv::replication::ReplicationClient;
use ferrumkv::store::SystemClock;
use ferrumkv::{server, Dispatcher, MemoryStore, ServerMetadata};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    info!("FerrumKV starting...");

    let metadata = Arc::new(ServerMetadata::new(config.replica_of.clone(), config.port));
    info!(
        "Role: {}, replication id {}",
        metadata.role().as_str(),
        metadata.replication_id()
    );

    if let Some(path) = config.snapshot_path() {
        info!("Snapshot file: {}", path.display());
    }

    let store = MemoryStore::open(
        config.dir.clone(),
        config.dbfilename.clone(),
        Arc::new(SystemClock),
    );
    let dispatcher = Arc::new(Dispatcher::new(store, metadata.clone()));

    if let Some(master) = metadata.replica_of() {
        info!("Replicating from {}", master);
        let client = ReplicationClient::new(dispatcher.clone());

        tokio::spawn(async move {
            if let Err(e) = client.run().await {
                error!("Replication stopped: {}", e);
            }
        });
    }

    server::run(&config.listen_addr(), dispatcher).await?;

    Ok(())
}

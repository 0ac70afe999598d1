//! Wiring of watchers, ingestors, the peer scanner and the web server

use crate::{
    event::{Broadcaster, EventSink},
    ingest::{self, block::{BlockIngestor, BlockIngestorConfig}, mempool::MempoolIngestor},
    network::{GeoLocator, IpInfoLocator, NetworkConfig, PeerProtocol, PeerScanner},
    store::Persistence,
    watcher::{FileWatcher, WatchMode},
    web::{start_web_server, WebState},
};
use log::{error, info, warn};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

#[derive(Debug, Clone)]
pub struct GeoConfig {
    pub token: String,
    pub max_entries: usize,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct IndexerConfiguration {
    pub block_dir: PathBuf,
    pub mempool_file: PathBuf,
    pub ingest: BlockIngestorConfig,
    pub network: NetworkConfig,
    pub geo: Option<GeoConfig>,
    pub web_hostname: String,
    pub web_port: u16,
}

fn geo_locator(config: Option<GeoConfig>) -> Option<Arc<dyn GeoLocator>> {
    let config = config?;
    match IpInfoLocator::new(config.token, config.max_entries, config.max_age) {
        Ok(locator) => Some(Arc::new(locator)),
        Err(e) => {
            warn!("Geolocation disabled: {e}");
            None
        }
    }
}

/// Runs the indexer until shutdown is requested. The peer scanner only runs
/// when a `protocol` backend is supplied. `store` is closed once every
/// subsystem has stopped.
pub async fn start_indexer(
    subsys: SubsystemHandle,
    config: IndexerConfiguration,
    store: Arc<dyn Persistence>,
    protocol: Option<Arc<dyn PeerProtocol>>,
) -> anyhow::Result<()> {
    info!("Starting mochimap indexer");
    let broadcaster = Broadcaster::new();
    let sink: Arc<dyn EventSink> = Arc::new(broadcaster.clone());

    let scanner = protocol.map(|protocol| {
        PeerScanner::new(
            config.network.clone(),
            protocol,
            geo_locator(config.geo.clone()),
            sink.clone(),
        )
    });
    if scanner.is_none() {
        info!("No peer protocol backend, network scanning disabled");
    }

    let (block_tx, block_rx) = ingest::channel();
    let ingestor = BlockIngestor::new(config.ingest.clone(), store.clone(), sink.clone(), block_tx.clone());
    let block_dir = config.block_dir.clone();
    subsys.start(SubsystemBuilder::new("Block Ingestor", move |s| async move {
        info!("Watching for new blocks in {}", block_dir.display());
        let watcher = FileWatcher::spawn(block_dir, WatchMode::Native, block_tx);
        ingestor.run(block_rx, s.on_shutdown_requested()).await;
        watcher.cleanup();
        anyhow::Ok(())
    }));

    let (mempool_tx, mempool_rx) = ingest::channel();
    let mempool = MempoolIngestor::new(store.clone(), sink.clone());
    let mempool_file = config.mempool_file.clone();
    subsys.start(SubsystemBuilder::new("Mempool Ingestor", move |s| async move {
        info!("Watching mempool {}", mempool_file.display());
        let watcher = FileWatcher::spawn(mempool_file, WatchMode::Native, mempool_tx);
        mempool.run(mempool_rx, s.on_shutdown_requested()).await;
        watcher.cleanup();
        anyhow::Ok(())
    }));

    if let Some(scanner) = scanner.clone() {
        subsys.start(SubsystemBuilder::new("Peer Scanner", move |s| async move {
            scanner.run(s.on_shutdown_requested()).await;
            anyhow::Ok(())
        }));
    }

    info!(
        "Starting the web server listening on {}:{}",
        config.web_hostname, config.web_port
    );
    let state = WebState {
        store: store.clone(),
        broadcaster,
        scanner,
    };
    let addrs = (config.web_hostname.clone(), config.web_port);
    subsys.start(SubsystemBuilder::new("Web Server", move |s| {
        start_web_server(s, state, addrs)
    }));

    subsys.on_shutdown_requested().await;
    subsys.wait_for_children().await;

    info!("Closing the store");
    if let Err(e) = store.close().await {
        error!("Error closing the store: {e}");
    }
    Ok(())
}

/// Imports a directory of block files without watching anything
pub async fn import_blocks(
    dir: PathBuf,
    config: BlockIngestorConfig,
    store: Arc<dyn Persistence>,
) -> anyhow::Result<usize> {
    let (queue, _) = ingest::channel();
    let sink = Arc::new(Broadcaster::new());
    let mut ingestor = BlockIngestor::new(config, store.clone(), sink, queue);

    let persisted = ingestor.import_dir(&dir).await;
    ingestor.cleanup();
    store.close().await?;
    persisted
}

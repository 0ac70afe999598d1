//! Mempool ingestion from a growing file of fixed-width transaction entries

use crate::{
    constants::TXENTRY_LEN,
    event::{EventSink, IndexerEvent},
    store::{Persistence, Row, TransactionRow},
    transaction::TransactionRecord,
    watcher::{WatchEvent, WatchEventKind},
};
use chrono::Utc;
use log::{debug, error, info, trace, warn};
use std::{future::Future, io::SeekFrom, path::Path, sync::Arc};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt},
    sync::mpsc,
};

pub struct MempoolIngestor {
    store: Arc<dyn Persistence>,
    sink: Arc<dyn EventSink>,

    /// Bytes of the current file generation already parsed
    position: u64,
}

impl MempoolIngestor {
    pub fn new(store: Arc<dyn Persistence>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            sink,
            position: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<WatchEvent>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Mempool ingestion shutdown signal received");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle(event).await;
                    }
                    None => break,
                },
            }
        }
        info!("Mempool ingestion cleanly shutdown");
    }

    /// Runs one read cycle, returning the number of entries read
    pub async fn handle(&mut self, event: WatchEvent) -> usize {
        if event.kind == WatchEventKind::Rename {
            debug!("{} replaced, resetting cursor", event.path.display());
            self.position = 0;
            return 0;
        }
        let Some(stats) = event.stats else {
            return 0;
        };

        if stats.size < self.position {
            debug!(
                "{} truncated from {} to {} bytes",
                event.path.display(),
                self.position,
                stats.size
            );
            self.position = 0;
        }

        let remaining = stats.size - self.position;
        if remaining == 0 {
            return 0;
        }
        if remaining % TXENTRY_LEN as u64 != 0 {
            warn!(
                "Invalid mempool {}: size {}, position {}, {} trailing bytes",
                event.path.display(),
                stats.size,
                self.position,
                remaining % TXENTRY_LEN as u64
            );
            return 0;
        }

        let buffer = match read_range(&event.path, self.position, remaining).await {
            Ok(buffer) => buffer,
            Err(e) => {
                error!("Error reading mempool {}: {e}", event.path.display());
                return 0;
            }
        };
        self.position = stats.size;

        let records = match TransactionRecord::parse_all(&buffer) {
            Ok(records) => records,
            Err(e) => {
                error!("Invalid mempool entries in {}: {e}", event.path.display());
                return 0;
            }
        };

        for tx in &records {
            self.ingest(tx).await;
        }
        trace!("Read {} mempool entries, position {}", records.len(), self.position);
        records.len()
    }

    async fn ingest(&self, tx: &TransactionRecord) {
        let row = TransactionRow::unconfirmed(tx, Utc::now());

        match self.store.transaction_by_hash(&tx.content_hash).await {
            Ok(Some(_)) => trace!("Transaction {} already recorded", tx.txid),
            Ok(None) => match self.store.insert_row(Row::Transaction(row.clone())).await {
                Ok(_) => debug!("Added unconfirmed transaction {}", tx.txid),
                Err(e) if e.is_duplicate() => trace!("Transaction {} already recorded", tx.txid),
                Err(e) => error!("Error storing transaction {}: {e}", tx.txid),
            },
            Err(e) => error!("Error looking up transaction {}: {e}", tx.txid),
        }

        self.sink.emit(IndexerEvent::Transaction(row));
    }
}

async fn read_range(path: &Path, position: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(position)).await?;

    let mut buffer = vec![0; len as usize];
    file.read_exact(&mut buffer).await?;
    Ok(buffer)
}

//! Serialized block ingestion.
//!
//! Every block file goes `queued -> reading -> parsing -> validating ->
//! persisting(block) -> persisting(tx|ledger) -> archived`. When the store
//! fails the raw bytes are backed up and, once the store works again, a
//! scan-only watcher drains the backups back through the same queue.

use crate::{
    block::{
        archive_file_name, is_valid_block_file,
        parser::{BlockError, BlockRecord, BlockTrailer},
        BlockHash, BlockType,
    },
    constants::*,
    event::{EventSink, IndexerEvent},
    ledger::{
        delta::compute_deltas, richlist::compute_richlist, LedgerEntry, LedgerIdentity,
    },
    store::{
        BalanceRow, BlockRow, Comparison, Persistence, Query, Row, StoreError, Table,
        TransactionRow,
    },
    watcher::{FileWatcher, WatchEvent, WatchEventKind, WatchMode, WatchTimings},
};
use anyhow::{bail, Context};
use log::{debug, error, info, trace, warn};
use std::{
    future::Future,
    io::{self, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::mpsc,
};

#[derive(Debug, Clone)]
pub struct BlockIngestorConfig {
    pub archive_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub ledger_identity: LedgerIdentity,
    pub recovery_timings: WatchTimings,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("error reading {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid block file {path}: {source}")]
    Parse { path: PathBuf, source: BlockError },

    #[error("error persisting block {bnum} ({bhash}): {source}")]
    Persist {
        bnum: u64,
        bhash: BlockHash,
        source: StoreError,
    },
}

/// What happened to one block file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Persisted { bnum: u64, bhash: BlockHash },

    /// Block row already present, derived rows were upserted again
    Duplicate { bnum: u64, bhash: BlockHash },

    /// Failed validation
    Rejected,

    /// Store failure, bytes were backed up
    BackedUp { bnum: u64, bhash: BlockHash },

    /// Gone before it could be read
    Missing,

    Unreadable,
}

pub struct BlockIngestor {
    config: BlockIngestorConfig,
    store: Arc<dyn Persistence>,
    sink: Arc<dyn EventSink>,

    // feeds the recovery watcher into our own queue
    queue: mpsc::Sender<WatchEvent>,
    db_failure: bool,
    recovery: Option<FileWatcher>,
}

impl BlockIngestor {
    pub fn new(
        config: BlockIngestorConfig,
        store: Arc<dyn Persistence>,
        sink: Arc<dyn EventSink>,
        queue: mpsc::Sender<WatchEvent>,
    ) -> Self {
        Self {
            config,
            store,
            sink,
            queue,
            db_failure: false,
            recovery: None,
        }
    }

    /// Persistence failed and has not succeeded since
    pub fn db_failure(&self) -> bool {
        self.db_failure
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery.is_some()
    }

    /// Processes queued events one at a time until `shutdown` resolves. The
    /// block in progress is always finished.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<WatchEvent>,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Block ingestion shutdown signal received");
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
        self.cleanup();
        info!("Block ingestion cleanly shutdown");
    }

    /// Processes `event` if it is a rename of a block file
    pub async fn handle(&mut self, event: WatchEvent) -> Option<BlockOutcome> {
        if event.kind != WatchEventKind::Rename || !is_valid_block_file(&event.path) {
            trace!("Ignoring {:?} of {}", event.kind, event.path.display());
            return None;
        }
        Some(self.process_file(&event.path).await)
    }

    pub async fn process_file(&mut self, path: &Path) -> BlockOutcome {
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} disappeared before it was read", path.display());
                return BlockOutcome::Missing;
            }
            Err(source) => {
                let path = path.to_path_buf();
                error!("{}", IngestError::Read { path, source });
                return BlockOutcome::Unreadable;
            }
        };

        let block = match BlockRecord::from_bytes(&data) {
            Ok(block) => block,
            Err(source) => {
                error!("{}", IngestError::Parse {
                    path: path.to_path_buf(),
                    source,
                });

                // forensic copy under the name it arrived with
                let name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.archive(&data, &name).await;
                return BlockOutcome::Rejected;
            }
        };

        let filename = block.archive_file_name();
        let outcome = match self.persist(&block).await {
            Ok(outcome) => {
                if self.db_failure {
                    self.db_failure = false;
                    info!("Store recovered, draining {}", self.config.backup_dir.display());
                    self.start_recovery();
                }
                if path.parent() == Some(self.config.backup_dir.as_path()) {
                    if let Err(e) = tokio::fs::remove_file(path).await {
                        warn!("Error removing recovered backup {}: {e}", path.display());
                    }
                }
                outcome
            }
            Err(e) => {
                error!("{e}");
                self.backup(&data, &filename).await;
                if !self.db_failure {
                    warn!("Store failure, backing up blocks to {}", self.config.backup_dir.display());
                    self.db_failure = true;
                    self.cleanup();
                }
                BlockOutcome::BackedUp {
                    bnum: block.bnum(),
                    bhash: *block.bhash(),
                }
            }
        };

        self.archive(&data, &filename).await;
        outcome
    }

    /// Processes every block file in `dir` in file name order, returning the
    /// number persisted
    pub async fn import_dir(&mut self, dir: &Path) -> anyhow::Result<usize> {
        let mut paths = vec![];
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("reading {}", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_valid_block_file(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        info!("Importing {} block files from {}", paths.len(), dir.display());
        let mut persisted = 0;
        for path in paths {
            if let BlockOutcome::Persisted { .. } = self.process_file(&path).await {
                persisted += 1;
            }
        }
        Ok(persisted)
    }

    async fn persist(&self, block: &BlockRecord) -> Result<BlockOutcome, IngestError> {
        let bnum = block.bnum();
        let bhash = *block.bhash();
        let persist_err = |source| IngestError::Persist {
            bnum,
            bhash,
            source,
        };

        let row = BlockRow::from(block);
        let fresh = match self.store.insert_row(Row::Block(row.clone())).await {
            Ok(_) => true,
            Err(e) if e.is_duplicate() => {
                debug!("Block {bnum} ({bhash}) already stored");
                false
            }
            Err(e) => return Err(persist_err(e)),
        };

        if fresh {
            info!("Added {}", block.summary());
            self.sink.emit(IndexerEvent::Block(row));
        }

        match block.block_type {
            BlockType::Normal => self.persist_transactions(block).await.map_err(persist_err)?,
            BlockType::Genesis | BlockType::Neogenesis => {
                self.persist_ledger(block).await.map_err(persist_err)?
            }
            BlockType::Pseudo | BlockType::Invalid => (),
        }

        Ok(if fresh {
            BlockOutcome::Persisted { bnum, bhash }
        } else {
            BlockOutcome::Duplicate { bnum, bhash }
        })
    }

    async fn persist_transactions(&self, block: &BlockRecord) -> Result<(), StoreError> {
        let rows: Vec<Row> = block
            .transactions()
            .iter()
            .map(|tx| Row::Transaction(TransactionRow::confirmed(tx, block)))
            .collect();

        let mut scope = self.store.scope().await?;
        let count = scope.bulk_load(rows).await?;
        scope.commit().await?;

        debug!("Stored {count} transactions of block {}", block.bnum());
        Ok(())
    }

    async fn persist_ledger(&self, block: &BlockRecord) -> Result<(), StoreError> {
        let baseline = self.load_baseline(block).await;
        let richlist = compute_richlist(block.ledger());
        let deltas = compute_deltas(
            block.ledger(),
            baseline.as_deref(),
            self.config.ledger_identity,
        );

        let ranked = richlist.len() as u64;
        let balances: Vec<Row> = deltas
            .iter()
            .map(|delta| Row::Balance(BalanceRow::from_delta(delta, block)))
            .collect();
        let num_deltas = balances.len();

        let mut scope = self.store.scope().await?;
        scope
            .bulk_load(richlist.into_iter().map(Row::Richlist).collect())
            .await?;
        scope
            .delete(
                Table::Richlist,
                &Query::new().filter("rank", Comparison::Gt, ranked),
            )
            .await?;
        scope
            .delete_block_balances(block.bnum(), &block.bhash().to_hex())
            .await?;
        scope.bulk_load(balances).await?;
        scope.commit().await?;

        debug!(
            "Stored {ranked} richlist entries and {num_deltas} balance deltas of block {}",
            block.bnum()
        );
        Ok(())
    }

    /// Ledger of the (neo)genesis block one epoch back, if it can be found
    async fn load_baseline(&self, block: &BlockRecord) -> Option<Vec<LedgerEntry>> {
        if block.bnum() < NEOGENESIS_INTERVAL {
            return None;
        }

        let target = block.bnum() - NEOGENESIS_INTERVAL;
        let bytes = match find_ancestor(&self.config.archive_dir, block, target).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("No baseline ledger for {}: {e:#}", block.summary());
                return None;
            }
        };

        match BlockRecord::from_bytes(&bytes) {
            Ok(baseline) if baseline.block_type.has_ledger() => {
                debug!("Diffing {} against {}", block.summary(), baseline.summary());
                Some(baseline.ledger().to_vec())
            }
            Ok(baseline) => {
                warn!("Baseline {} carries no ledger", baseline.summary());
                None
            }
            Err(e) => {
                warn!("Invalid baseline block {target} for {}: {e}", block.summary());
                None
            }
        }
    }

    async fn archive(&self, data: &[u8], name: &str) {
        match write_once(&self.config.archive_dir, name, data).await {
            Ok(true) => trace!("Archived {name}"),
            Ok(false) => trace!("{name} already archived"),
            Err(e) => error!("Error archiving {name}: {e}"),
        }
    }

    async fn backup(&self, data: &[u8], name: &str) {
        match write_once(&self.config.backup_dir, name, data).await {
            Ok(_) => info!("Backed up {name}"),
            Err(e) => error!("Error backing up {name}: {e}"),
        }
    }

    fn start_recovery(&mut self) {
        if let Some(previous) = self.recovery.take() {
            previous.cleanup();
        }
        self.recovery = Some(FileWatcher::spawn_with(
            self.config.backup_dir.clone(),
            WatchMode::ScanOnly,
            self.config.recovery_timings,
            self.queue.clone(),
        ));
    }

    /// Tears down the recovery watcher
    pub fn cleanup(&mut self) {
        if let Some(recovery) = self.recovery.take() {
            recovery.cleanup();
        }
    }
}

/// Writes `data` to `dir/name` unless it already exists
async fn write_once(dir: &Path, name: &str, data: &[u8]) -> io::Result<bool> {
    tokio::fs::create_dir_all(dir).await?;

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dir.join(name))
        .await;

    match file {
        Ok(mut file) => {
            file.write_all(data).await?;
            file.flush().await?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

async fn read_trailer(path: &Path) -> anyhow::Result<BlockTrailer> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    file.seek(SeekFrom::End(-(BTRAILER_LEN as i64))).await?;

    let mut trailer = [0; BTRAILER_LEN];
    file.read_exact(&mut trailer).await?;
    Ok(BlockTrailer::from_block_bytes(&trailer)?)
}

/// Walks the previous-hash links of `block` back through the archive to
/// height `target`, returning that block's bytes
async fn find_ancestor(archive_dir: &Path, block: &BlockRecord, target: u64) -> anyhow::Result<Vec<u8>> {
    let mut height = block.bnum() - 1;
    let mut hash = *block.phash();

    loop {
        let path = archive_dir.join(archive_file_name(height, &hash));
        if height == target {
            return tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()));
        }

        let trailer = read_trailer(&path).await?;
        if trailer.bnum != height || trailer.bhash != hash {
            bail!("{} does not hold block {height} ({hash})", path.display());
        }
        hash = trailer.phash;
        height -= 1;
    }
}

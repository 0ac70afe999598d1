mod block;

use crate::helpers::{mocks::*, setup_new_db_dir};
use mochimap_indexer::{
    ingest::{
        self,
        block::{BlockIngestor, BlockIngestorConfig},
    },
    ledger::LedgerIdentity,
    watcher::{WatchEvent, WatchTimings},
};
use std::{path::Path, sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Directories of one block ingestion setup
pub struct Dirs {
    pub db: TempDir,
    pub blocks: TempDir,
    pub archive: TempDir,
    pub backup: TempDir,
}

impl Dirs {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            db: setup_new_db_dir("mochimap-db-")?,
            blocks: TempDir::with_prefix("mochimap-bc-")?,
            archive: TempDir::with_prefix("mochimap-archive-")?,
            backup: TempDir::with_prefix("mochimap-backup-")?,
        })
    }

    pub fn config(&self) -> BlockIngestorConfig {
        BlockIngestorConfig {
            archive_dir: self.archive.path().to_path_buf(),
            backup_dir: self.backup.path().to_path_buf(),
            ledger_identity: LedgerIdentity::Tag,
            recovery_timings: WatchTimings {
                init_retry: Duration::from_millis(50),
                rename_reinit: Duration::from_millis(50),
                scan_interval: Duration::from_millis(50),
            },
        }
    }

    /// Writes a node block file, returning its path
    pub fn write_block(&self, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = self.blocks.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

pub struct Setup {
    pub dirs: Dirs,
    pub store: Arc<TestStore>,
    pub sink: Arc<RecordingSink>,
    pub ingestor: BlockIngestor,
    pub queue: mpsc::Receiver<WatchEvent>,
}

impl Setup {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_store(|path| TestStore::open(path))
    }

    pub fn with_store(open: impl FnOnce(&Path) -> anyhow::Result<TestStore>) -> anyhow::Result<Self> {
        let dirs = Dirs::new()?;
        let store = Arc::new(open(dirs.db.path())?);
        let sink = Arc::new(RecordingSink::default());
        let (tx, queue) = ingest::channel();
        let ingestor = BlockIngestor::new(dirs.config(), store.clone(), sink.clone(), tx);

        Ok(Self {
            dirs,
            store,
            sink,
            ingestor,
            queue,
        })
    }
}

/// Names of the files in `dir`, sorted
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

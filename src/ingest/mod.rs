//! Ingestion pipelines fed by [crate::watcher::FileWatcher]s

pub mod block;
pub mod mempool;

use crate::{constants::WATCH_CHANNEL_CAPACITY, watcher::WatchEvent};
use tokio::sync::mpsc;

/// Channel connecting watchers to an ingestor
pub fn channel() -> (mpsc::Sender<WatchEvent>, mpsc::Receiver<WatchEvent>) {
    mpsc::channel(WATCH_CHANNEL_CAPACITY)
}

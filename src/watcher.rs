//! Self-healing file/directory watcher.
//!
//! A [FileWatcher] reports `(stats, kind, filename)` for its target to a
//! channel. Missing targets are retried, native watch errors and renames of
//! the target itself trigger a fresh init. Nothing is ever returned to the
//! caller as an error.

use crate::constants::*;
use log::{debug, error, info, trace, warn};
use notify::{
    event::{AccessKind, AccessMode, ModifyKind},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};
use tokio::{sync::mpsc, task::JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// Baseline stat of a file target
    Init,

    /// Entry created, removed or renamed
    Rename,

    /// Contents or metadata changed
    Change,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStats {
    pub size: u64,
    pub is_file: bool,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
}

impl From<std::fs::Metadata> for FileStats {
    fn from(metadata: std::fs::Metadata) -> Self {
        Self {
            size: metadata.len(),
            is_file: metadata.is_file(),
            is_dir: metadata.is_dir(),
            modified: metadata.modified().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,

    /// Full path of the entry the event is about
    pub path: PathBuf,
    pub filename: Option<String>,

    /// Stats of the watched target, absent when it is gone
    pub stats: Option<FileStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Native change notifications plus a baseline pass
    Native,

    /// Baseline pass, then periodic re-stat of the target only
    ScanOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct WatchTimings {
    pub init_retry: Duration,
    pub rename_reinit: Duration,
    pub scan_interval: Duration,
}

impl Default for WatchTimings {
    fn default() -> Self {
        Self {
            init_retry: WATCH_INIT_RETRY,
            rename_reinit: WATCH_RENAME_REINIT,
            scan_interval: SCAN_ONLY_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub struct WatchTarget {
    pub path: PathBuf,
    pub base_name: String,
    pub watching: AtomicBool,
}

impl WatchTarget {
    fn new(path: PathBuf) -> Self {
        let base_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            base_name,
            watching: AtomicBool::new(false),
        }
    }
}

pub struct FileWatcher {
    target: Arc<WatchTarget>,
    task: JoinHandle<()>,
}

/// Why a native watch ended
enum Reinit {
    Renamed,
    WatchError,
    Closed,
}

impl FileWatcher {
    pub fn spawn(path: impl Into<PathBuf>, mode: WatchMode, events: mpsc::Sender<WatchEvent>) -> Self {
        Self::spawn_with(path, mode, WatchTimings::default(), events)
    }

    pub fn spawn_with(
        path: impl Into<PathBuf>,
        mode: WatchMode,
        timings: WatchTimings,
        events: mpsc::Sender<WatchEvent>,
    ) -> Self {
        let target = Arc::new(WatchTarget::new(path.into()));
        let task = tokio::spawn(run(target.clone(), mode, timings, events));
        Self { target, task }
    }

    pub fn path(&self) -> &Path {
        &self.target.path
    }

    /// A native watch is currently attached
    pub fn is_watching(&self) -> bool {
        self.target.watching.load(Ordering::Acquire)
    }

    /// Stops watching, dropping any pending retry
    pub fn cleanup(&self) {
        if !self.task.is_finished() {
            debug!("Cleaning up watcher on {}", self.target.path.display());
            self.task.abort();
        }
        self.target.watching.store(false, Ordering::Release);
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn run(
    target: Arc<WatchTarget>,
    mode: WatchMode,
    timings: WatchTimings,
    events: mpsc::Sender<WatchEvent>,
) {
    loop {
        match init(&target, &events).await {
            Ok(true) => (),
            Ok(false) => return,
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    debug!("{} not found, retrying", target.path.display());
                } else {
                    warn!("Error initializing watcher on {}: {e}", target.path.display());
                }
                tokio::time::sleep(timings.init_retry).await;
                continue;
            }
        }

        let reinit = match mode {
            WatchMode::Native => watch(&target, &events).await,
            WatchMode::ScanOnly => poll(&target, timings.scan_interval, &events).await,
        };
        target.watching.store(false, Ordering::Release);

        match reinit {
            Reinit::Closed => return,
            Reinit::Renamed => tokio::time::sleep(timings.rename_reinit).await,
            Reinit::WatchError => (),
        }
    }
}

/// Delivers the baseline. `Ok(false)` when the subscriber is gone.
async fn init(target: &WatchTarget, events: &mpsc::Sender<WatchEvent>) -> io::Result<bool> {
    let stats: FileStats = tokio::fs::metadata(&target.path).await?.into();

    if stats.is_dir {
        let mut entries = vec![];
        let mut dir = tokio::fs::read_dir(&target.path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let stats = entry.metadata().await.ok().map(FileStats::from);
            entries.push((entry.path(), entry.file_name(), stats));
        }
        entries.sort_by(|a, b| a.1.cmp(&b.1));

        debug!(
            "Found {} entries in {}",
            entries.len(),
            target.path.display()
        );
        for (path, filename, stats) in entries {
            let event = WatchEvent {
                kind: WatchEventKind::Rename,
                path,
                filename: Some(filename.to_string_lossy().into_owned()),
                stats,
            };
            if events.send(event).await.is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    } else {
        let event = WatchEvent {
            kind: WatchEventKind::Init,
            path: target.path.clone(),
            filename: Some(target.base_name.clone()),
            stats: Some(stats),
        };
        Ok(events.send(event).await.is_ok())
    }
}

fn event_kind(kind: &EventKind) -> Option<WatchEventKind> {
    match kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
            Some(WatchEventKind::Rename)
        }
        EventKind::Modify(_) | EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            Some(WatchEventKind::Change)
        }
        _ => None,
    }
}

async fn watch(target: &WatchTarget, events: &mpsc::Sender<WatchEvent>) -> Reinit {
    let (tx, mut rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);

    // runs on the notify thread, handing events over in detection order
    let watcher = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            if let Err(e) = tx.blocking_send(result) {
                debug!("Dropping watch event, receiver gone: {}", e);
            }
        },
        Config::default(),
    );

    let is_dir = target.path.is_dir();
    let watch_path = if is_dir {
        target.path.clone()
    } else {
        target
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    };

    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("Error creating watcher for {}: {e}", target.path.display());
            return Reinit::WatchError;
        }
    };
    if let Err(e) = watcher.watch(&watch_path, RecursiveMode::NonRecursive) {
        error!("Error watching {}: {e}", watch_path.display());
        return Reinit::WatchError;
    }

    target.watching.store(true, Ordering::Release);
    info!("Watching {}", target.path.display());

    while let Some(result) = rx.recv().await {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                error!("Watch error on {}: {e}", target.path.display());
                return Reinit::WatchError;
            }
        };
        trace!("Event: {event:?}");

        let Some(kind) = event_kind(&event.kind) else {
            continue;
        };
        for path in event.paths {
            let is_target = path == target.path;
            if !is_target && (!is_dir || path.parent() != Some(target.path.as_path())) {
                continue;
            }

            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned());

            if is_target && kind == WatchEventKind::Rename {
                // rotated or replaced, pick up the new generation after a pause
                debug!("{} was renamed, reinitializing", target.path.display());
                let event = WatchEvent {
                    kind,
                    path,
                    filename,
                    stats: None,
                };
                if events.send(event).await.is_err() {
                    return Reinit::Closed;
                }
                return Reinit::Renamed;
            }

            let stats = match tokio::fs::metadata(&target.path).await {
                Ok(metadata) => Some(metadata.into()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Reinit::Renamed,
                Err(e) => {
                    warn!("Error reading stats of {}: {e}", target.path.display());
                    None
                }
            };
            let event = WatchEvent {
                kind,
                path,
                filename,
                stats,
            };
            if events.send(event).await.is_err() {
                return Reinit::Closed;
            }
        }
    }
    Reinit::WatchError
}

async fn poll(target: &WatchTarget, interval: Duration, events: &mpsc::Sender<WatchEvent>) -> Reinit {
    let mut last = tokio::fs::metadata(&target.path).await.ok().map(FileStats::from);
    loop {
        tokio::time::sleep(interval).await;

        let stats = match tokio::fs::metadata(&target.path).await {
            Ok(metadata) => FileStats::from(metadata),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Error reading stats of {}: {e}", target.path.display());
                }
                return Reinit::Renamed;
            }
        };

        if last.as_ref() != Some(&stats) {
            last = Some(stats.clone());
            let event = WatchEvent {
                kind: WatchEventKind::Change,
                path: target.path.clone(),
                filename: Some(target.base_name.clone()),
                stats: Some(stats),
            };
            if events.send(event).await.is_err() {
                return Reinit::Closed;
            }
        }
    }
}

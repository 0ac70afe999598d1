use mochimap_indexer::watcher::{FileWatcher, WatchEvent, WatchEventKind, WatchMode, WatchTimings};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn fast() -> WatchTimings {
    WatchTimings {
        init_retry: Duration::from_millis(50),
        rename_reinit: Duration::from_millis(50),
        scan_interval: Duration::from_millis(50),
    }
}

async fn next(rx: &mut mpsc::Receiver<WatchEvent>) -> WatchEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("watch event in time")
        .expect("watcher running")
}

/// Skips events until one matches
async fn next_matching(rx: &mut mpsc::Receiver<WatchEvent>, f: impl Fn(&WatchEvent) -> bool) -> WatchEvent {
    loop {
        let event = next(rx).await;
        if f(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn directory_baseline_is_sorted() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::with_prefix("mochimap-watch-")?;
    for name in ["b02.bc", "b00.bc", "b01.bc"] {
        std::fs::write(dir.path().join(name), b"x")?;
    }

    let (tx, mut rx) = mpsc::channel(16);
    let watcher = FileWatcher::spawn_with(dir.path(), WatchMode::ScanOnly, fast(), tx);

    let mut names = vec![];
    for _ in 0..3 {
        let event = next(&mut rx).await;
        assert_eq!(event.kind, WatchEventKind::Rename);
        assert_eq!(event.path.parent(), Some(dir.path()));
        names.push(event.filename.unwrap());
    }
    assert_eq!(names, vec!["b00.bc", "b01.bc", "b02.bc"]);

    watcher.cleanup();
    Ok(())
}

#[tokio::test]
async fn native_directory_reports_new_files() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::with_prefix("mochimap-watch-")?;
    let (tx, mut rx) = mpsc::channel(16);
    let watcher = FileWatcher::spawn_with(dir.path(), WatchMode::Native, fast(), tx);

    let start = std::time::Instant::now();
    while !watcher.is_watching() && start.elapsed() < WAIT {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(watcher.is_watching());

    // written aside, then moved in the way the node does
    let staged = tempfile::TempDir::with_prefix("mochimap-stage-")?;
    let source = staged.path().join("b10.bc");
    std::fs::write(&source, b"block")?;
    std::fs::rename(&source, dir.path().join("b10.bc"))?;

    let event = next_matching(&mut rx, |e| e.filename.as_deref() == Some("b10.bc")).await;
    assert_eq!(event.kind, WatchEventKind::Rename);
    assert_eq!(event.path, dir.path().join("b10.bc"));

    watcher.cleanup();
    assert!(!watcher.is_watching());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn new_files_arrive_in_detection_order() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::with_prefix("mochimap-watch-")?;
    let (tx, mut rx) = mpsc::channel(64);
    let watcher = FileWatcher::spawn_with(dir.path(), WatchMode::Native, fast(), tx);

    let start = std::time::Instant::now();
    while !watcher.is_watching() && start.elapsed() < WAIT {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(watcher.is_watching());

    let staged = tempfile::TempDir::with_prefix("mochimap-stage-")?;
    let names: Vec<String> = (1..=24u64).map(|bnum| format!("b{bnum:016x}.bc")).collect();
    for name in &names {
        let source = staged.path().join(name);
        std::fs::write(&source, b"block")?;
        std::fs::rename(&source, dir.path().join(name))?;
    }

    let mut seen: Vec<String> = vec![];
    while seen.len() < names.len() {
        let event = next(&mut rx).await;
        match event.filename {
            Some(name) if event.kind == WatchEventKind::Rename && !seen.contains(&name) => {
                seen.push(name)
            }
            _ => (),
        }
    }
    assert_eq!(seen, names);

    watcher.cleanup();
    Ok(())
}

#[tokio::test]
async fn missing_file_is_retried() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::with_prefix("mochimap-watch-")?;
    let path = dir.path().join("txclean.dat");

    let (tx, mut rx) = mpsc::channel(16);
    let watcher = FileWatcher::spawn_with(&path, WatchMode::ScanOnly, fast(), tx);

    tokio::time::sleep(Duration::from_millis(120)).await;
    std::fs::write(&path, vec![0; 10])?;

    let init = next(&mut rx).await;
    assert_eq!(init.kind, WatchEventKind::Init);
    assert_eq!(init.stats.map(|s| s.size), Some(10));

    // let the poll loop take its first stat
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&path, vec![0; 25])?;
    let change = next_matching(&mut rx, |e| e.kind == WatchEventKind::Change).await;
    assert_eq!(change.stats.map(|s| s.size), Some(25));
    assert_eq!(change.filename.as_deref(), Some("txclean.dat"));

    watcher.cleanup();
    Ok(())
}

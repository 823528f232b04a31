// src/indexer/watcher.rs
// Debounced directory watcher. Wraps `notify`'s raw filesystem events with
// per-path debouncing, an initial-scan `ready` signal, and a never-halt
// error channel with exponential-backoff restart.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Changed,
    Unlinked,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct FileWatcher {
    pub events: mpsc::UnboundedReceiver<WatchEvent>,
    pub errors: mpsc::UnboundedReceiver<String>,
    pub ready: oneshot::Receiver<()>,
    stop: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn spawn(dirs: Vec<PathBuf>, suffix: String, debounce: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(Notify::new());

        let task_stop = stop.clone();
        let handle = tokio::spawn(run(dirs, suffix, debounce, events_tx, errors_tx, ready_tx, task_stop));

        Self { events: events_rx, errors: errors_rx, ready: ready_rx, stop, handle: Some(handle) }
    }

    /// Cancels all pending debounce timers and awaits the underlying OS
    /// watcher's shutdown.
    pub async fn stop(&mut self) {
        self.stop.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

fn matches_suffix(path: &Path, suffix: &str) -> bool {
    path.to_string_lossy().ends_with(suffix)
}

async fn run(
    dirs: Vec<PathBuf>,
    suffix: String,
    debounce: Duration,
    events_tx: mpsc::UnboundedSender<WatchEvent>,
    errors_tx: mpsc::UnboundedSender<String>,
    ready_tx: oneshot::Sender<()>,
    stop: Arc<Notify>,
) {
    for dir in &dirs {
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && matches_suffix(entry.path(), &suffix) {
                let _ = events_tx.send(WatchEvent { path: entry.path().to_path_buf(), kind: WatchEventKind::Added });
            }
        }
    }
    let _ = ready_tx.send(());

    let mut backoff = INITIAL_BACKOFF;
    loop {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let watch_result = build_watcher(&dirs, raw_tx);

        let mut watcher = match watch_result {
            Ok(w) => w,
            Err(e) => {
                let _ = errors_tx.send(format!("failed to start watcher: {e}"));
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = stop.notified() => return,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };
        backoff = INITIAL_BACKOFF;

        let mut pending: HashMap<PathBuf, JoinHandle<()>> = HashMap::new();
        loop {
            tokio::select! {
                _ = stop.notified() => {
                    for (_, h) in pending.drain() {
                        h.abort();
                    }
                    drop(watcher);
                    return;
                }
                maybe = raw_rx.recv() => {
                    match maybe {
                        None => break, // watcher side dropped; restart
                        Some(Ok(event)) => {
                            if let Some((path, kind)) = classify(&event, &suffix) {
                                if let Some(existing) = pending.remove(&path) {
                                    existing.abort();
                                }
                                let tx = events_tx.clone();
                                let wait = debounce;
                                pending.insert(path.clone(), tokio::spawn(async move {
                                    tokio::time::sleep(wait).await;
                                    let _ = tx.send(WatchEvent { path, kind });
                                }));
                            }
                        }
                        Some(Err(e)) => {
                            let _ = errors_tx.send(format!("watch error: {e}"));
                        }
                    }
                }
            }
        }
        debug!("watcher channel closed, restarting after backoff");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = stop.notified() => return,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

fn build_watcher(
    dirs: &[PathBuf],
    raw_tx: mpsc::UnboundedSender<notify::Result<notify::Event>>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = raw_tx.send(res);
        },
        notify::Config::default(),
    )?;
    for dir in dirs {
        if let Err(e) = watcher.watch(dir, RecursiveMode::Recursive) {
            warn!("could not watch {}: {}", dir.display(), e);
        }
    }
    Ok(watcher)
}

fn classify(event: &notify::Event, suffix: &str) -> Option<(PathBuf, WatchEventKind)> {
    let path = event.paths.first()?.clone();
    if !matches_suffix(&path, suffix) {
        return None;
    }
    let kind = match event.kind {
        EventKind::Create(_) => WatchEventKind::Added,
        EventKind::Modify(_) => WatchEventKind::Changed,
        EventKind::Remove(_) => WatchEventKind::Unlinked,
        _ => return None,
    };
    Some((path, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_suffix_filters_non_jsonl() {
        assert!(matches_suffix(Path::new("/tmp/a.jsonl"), ".jsonl"));
        assert!(!matches_suffix(Path::new("/tmp/a.txt"), ".jsonl"));
    }

    #[tokio::test]
    async fn initial_scan_emits_added_then_ready() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("session.jsonl"), "{}\n").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), "x").unwrap();

        let mut watcher = FileWatcher::spawn(vec![dir.path().to_path_buf()], ".jsonl".to_string(), Duration::from_millis(50));
        let added = watcher.events.recv().await.unwrap();
        assert_eq!(added.kind, WatchEventKind::Added);
        assert!(added.path.to_string_lossy().ends_with("session.jsonl"));
        watcher.ready.try_recv().ok();
        watcher.stop().await;
    }
}

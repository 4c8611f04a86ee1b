//! Polling file watcher.
//!
//! Periodically snapshots the script root (paths plus modification times) and
//! publishes a [`FileEvent`] for every entry that appeared, disappeared or
//! changed since the previous snapshot.

use super::bus::ChangeEventBus;
use super::event::{FileChangeKind, FileEvent};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Modification state of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStamp {
    /// Entry is a directory.
    pub is_dir: bool,
    /// Last modification time, if the platform reports one.
    pub modified: Option<SystemTime>,
    /// Size in bytes.
    pub len: u64,
}

/// Path-ordered snapshot of a directory tree.
pub type Snapshot = BTreeMap<PathBuf, EntryStamp>;

/// Publishes file events for a directory tree by polling it.
#[derive(Debug, Clone)]
pub struct PollingFileWatcher {
    root: PathBuf,
    source: String,
    interval: Duration,
    bus: ChangeEventBus,
}

impl PollingFileWatcher {
    /// Create a new watcher for `root`.
    pub fn new(
        root: impl Into<PathBuf>,
        source: impl Into<String>,
        interval: Duration,
        bus: ChangeEventBus,
    ) -> Self {
        Self {
            root: root.into(),
            source: source.into(),
            interval: interval.max(Duration::from_millis(10)),
            bus,
        }
    }

    /// Run the polling loop until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut previous = self.take_snapshot().await;
            info!(
                "Watching '{}' ({} entries, every {:?})",
                self.root.display(),
                previous.len(),
                self.interval
            );

            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let current = self.take_snapshot().await;
                        for event in diff_snapshots(&self.source, &previous, &current) {
                            debug!("{:?} {}", event.kind, event.path.display());
                            self.bus.publish(event);
                        }
                        previous = current;
                    }
                }
            }
            debug!("File watcher for '{}' stopped", self.root.display());
        })
    }

    async fn take_snapshot(&self) -> Snapshot {
        let root = self.root.clone();
        match tokio::task::spawn_blocking(move || snapshot(&root)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Snapshot of '{}' failed: {}", self.root.display(), e);
                Snapshot::new()
            }
        }
    }
}

/// Walk `root` recursively. Unreadable entries are skipped.
pub fn snapshot(root: &Path) -> Snapshot {
    let mut out = Snapshot::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let path = entry.path();
            if metadata.is_dir() {
                pending.push(path.clone());
            }
            out.insert(
                path,
                EntryStamp {
                    is_dir: metadata.is_dir(),
                    modified: metadata.modified().ok(),
                    len: metadata.len(),
                },
            );
        }
    }
    out
}

/// Events that turn `previous` into `current`. Directory mtime changes are
/// not reported; their children are.
pub fn diff_snapshots(source: &str, previous: &Snapshot, current: &Snapshot) -> Vec<FileEvent> {
    let mut events = Vec::new();
    for (path, stamp) in current {
        match previous.get(path) {
            None => events.push(FileEvent::new(source, FileChangeKind::Created, path.clone())),
            Some(old) if !stamp.is_dir && old != stamp => {
                events.push(FileEvent::new(source, FileChangeKind::Changed, path.clone()))
            }
            Some(_) => {}
        }
    }
    for path in previous.keys() {
        if !current.contains_key(path) {
            events.push(FileEvent::new(source, FileChangeKind::Deleted, path.clone()));
        }
    }
    events
}

//! Change events carried on the bus.

use std::path::{Path, PathBuf};

/// Source tag of events produced by the script-root file watcher.
pub const SCRIPT_FILES_SOURCE: &str = "ScriptFiles";

/// Kind of file system change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChangeKind {
    /// File or directory appeared.
    Created,
    /// File or directory disappeared.
    Deleted,
    /// File contents or metadata changed.
    Changed,
}

/// A file system change under a watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Which watcher produced the event.
    pub source: String,
    /// What happened.
    pub kind: FileChangeKind,
    /// Absolute path of the changed entry.
    pub path: PathBuf,
    /// File name component of `path`.
    pub name: String,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(source: impl Into<String>, kind: FileChangeKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            source: source.into(),
            kind,
            path,
            name,
        }
    }

    /// A script-root creation event.
    pub fn created(path: impl AsRef<Path>) -> Self {
        Self::new(SCRIPT_FILES_SOURCE, FileChangeKind::Created, path.as_ref())
    }

    /// A script-root deletion event.
    pub fn deleted(path: impl AsRef<Path>) -> Self {
        Self::new(SCRIPT_FILES_SOURCE, FileChangeKind::Deleted, path.as_ref())
    }

    /// A script-root change event.
    pub fn changed(path: impl AsRef<Path>) -> Self {
        Self::new(SCRIPT_FILES_SOURCE, FileChangeKind::Changed, path.as_ref())
    }
}

/// Explicit request to restart the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRestartEvent {
    /// Who asked.
    pub source: String,
}

/// Explicit request to shut the application down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostShutdownEvent {
    /// Who asked.
    pub source: String,
}

/// Every event that travels on the change bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    /// A watched file changed.
    File(FileEvent),
    /// Restart requested.
    HostRestart(HostRestartEvent),
    /// Shutdown requested.
    HostShutdown(HostShutdownEvent),
}

impl ScriptEvent {
    /// Restart request from `source`.
    pub fn restart(source: impl Into<String>) -> Self {
        ScriptEvent::HostRestart(HostRestartEvent {
            source: source.into(),
        })
    }

    /// Shutdown request from `source`.
    pub fn shutdown(source: impl Into<String>) -> Self {
        ScriptEvent::HostShutdown(HostShutdownEvent {
            source: source.into(),
        })
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ScriptEvent::File(_) => "file_event",
            ScriptEvent::HostRestart(_) => "host_restart",
            ScriptEvent::HostShutdown(_) => "host_shutdown",
        }
    }
}

impl From<FileEvent> for ScriptEvent {
    fn from(event: FileEvent) -> Self {
        ScriptEvent::File(event)
    }
}

impl From<HostRestartEvent> for ScriptEvent {
    fn from(event: HostRestartEvent) -> Self {
        ScriptEvent::HostRestart(event)
    }
}

impl From<HostShutdownEvent> for ScriptEvent {
    fn from(event: HostShutdownEvent) -> Self {
        ScriptEvent::HostShutdown(event)
    }
}

//! Change events: types, the broadcast bus and the polling watcher.

pub mod bus;
pub mod event;
pub mod watcher;

pub use bus::{ChangeEventBus, Subscription};
pub use event::{
    FileChangeKind, FileEvent, HostRestartEvent, HostShutdownEvent, ScriptEvent,
    SCRIPT_FILES_SOURCE,
};
pub use watcher::PollingFileWatcher;

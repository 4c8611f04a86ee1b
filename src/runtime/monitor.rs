//! Change-driven restart controller.
//!
//! [`FileMonitor`] listens to the change bus, classifies each event as
//! ignorable, restart or shutdown, debounces each class separately and runs
//! the resulting effect on a single driver task:
//!
//! ```text
//! ChangeEventBus ──► ingest task ──► classify ──► deadline per intent
//!                                                      │
//!                              driver task ◄── wake ───┘
//!                                   │
//!                 suspended? ──yes──► queue (most severe wins)
//!                                   │ no
//!                 Shutdown ──► ApplicationLifetime::stop_application
//!                 Restart  ──► HostRestarter::restart_host
//! ```
//!
//! [`FileMonitor::suspend_restart`] opens a scope during which fired intents
//! are queued. Scopes nest; dropping the last one flushes the queue.

use crate::error::HostError;
use crate::events::{ChangeEventBus, FileChangeKind, FileEvent, ScriptEvent, Subscription, SCRIPT_FILES_SOURCE};
use crate::runtime::config::HostConfig;
use async_trait::async_trait;
use std::path::{Component, Path};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sentinel file that takes the app offline while present.
pub const APP_OFFLINE_FILE_NAME: &str = "app_offline.htm";

const ASSEMBLY_EXTENSIONS: &[&str] = &["dll", "exe"];

/// Something that can hot-restart the host.
#[async_trait]
pub trait HostRestarter: Send + Sync {
    /// Restart the host.
    async fn restart_host(&self) -> Result<(), HostError>;
}

/// Something that can stop the whole application.
pub trait ApplicationLifetime: Send + Sync {
    /// Request application shutdown.
    fn stop_application(&self);
}

impl ApplicationLifetime for CancellationToken {
    fn stop_application(&self) {
        self.cancel();
    }
}

/// Effect requested by a change. `Shutdown` is more severe than `Restart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RestartIntent {
    /// Rebuild the execution engine.
    Restart,
    /// Stop the application.
    Shutdown,
}

#[derive(Debug, Default)]
struct ControllerState {
    suspend_depth: usize,
    quiet_depth: usize,
    restart_deadline: Option<Instant>,
    shutdown_deadline: Option<Instant>,
    queued: Option<RestartIntent>,
    flush: Option<RestartIntent>,
    shutdown_scheduled: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<ControllerState>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Guard returned by [`FileMonitor::suspend_restart`].
///
/// Restarts and shutdowns stay queued until every guard is dropped.
#[must_use = "restarts resume as soon as the guard is dropped"]
#[derive(Debug)]
pub struct RestartSuspension {
    shared: Arc<Shared>,
    quiet: bool,
}

impl Drop for RestartSuspension {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.suspend_depth = state.suspend_depth.saturating_sub(1);
        if self.quiet {
            state.quiet_depth = state.quiet_depth.saturating_sub(1);
        }
        if state.suspend_depth > 0 {
            return;
        }

        if state.quiet_depth == 0 {
            debug!("Restarts resumed");
        }
        if let Some(intent) = state.queued.take() {
            state.flush = state.flush.max(Some(intent));
            drop(state);
            self.shared.wake.notify_one();
        }
    }
}

/// Watch lists in effect, refreshed from `host.json` on every restart.
#[derive(Debug, Clone, PartialEq, Eq)]
struct WatchSettings {
    directories: Vec<String>,
    files: Vec<String>,
    enabled: bool,
}

impl WatchSettings {
    fn from_config(config: &HostConfig) -> Self {
        Self {
            directories: config.all_watch_directories(),
            files: config.watch_files.clone(),
            enabled: config.file_watching_enabled,
        }
    }
}

/// Everything the ingest and driver tasks need.
struct MonitorCore {
    config: HostConfig,
    settings: RwLock<WatchSettings>,
    debounce: Duration,
    directory_snapshot: Mutex<Vec<String>>,
    shared: Arc<Shared>,
    restarter: Arc<dyn HostRestarter>,
    lifetime: Arc<dyn ApplicationLifetime>,
    token: CancellationToken,
}

/// Watches script changes and restarts or shuts down the host.
///
/// The background tasks stop when [`FileMonitor::stop`] is called or the
/// monitor is dropped.
pub struct FileMonitor {
    core: Arc<MonitorCore>,
    bus: ChangeEventBus,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FileMonitor {
    /// Create a monitor for the app described by `config`.
    ///
    /// `config` should not have `host.json` applied yet; the monitor overlays
    /// it itself and again before every restart.
    pub fn new(
        config: &HostConfig,
        bus: &ChangeEventBus,
        restarter: Arc<dyn HostRestarter>,
        lifetime: Arc<dyn ApplicationLifetime>,
    ) -> Arc<Self> {
        let core = MonitorCore {
            config: config.clone(),
            settings: RwLock::new(WatchSettings::from_config(config)),
            debounce: config.restart_debounce_duration(),
            directory_snapshot: Mutex::new(top_level_directories(&config.root_script_path)),
            shared: Arc::new(Shared::default()),
            restarter,
            lifetime,
            token: CancellationToken::new(),
        };
        core.refresh_settings();

        Arc::new(Self {
            core: Arc::new(core),
            bus: bus.clone(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to the bus and start the ingest and driver tasks.
    pub fn start(&self) {
        let subscription = self.bus.subscribe_filtered(|event| match event {
            ScriptEvent::File(file) => file.source == SCRIPT_FILES_SOURCE,
            _ => true,
        });

        let ingest = {
            let core = Arc::clone(&self.core);
            tokio::spawn(async move { core.ingest(subscription).await })
        };
        let driver = {
            let core = Arc::clone(&self.core);
            tokio::spawn(async move { core.drive().await })
        };

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(ingest);
        tasks.push(driver);
        info!("Monitoring '{}' for changes", self.core.config.root_script_path.display());
    }

    /// Stop both tasks. Pending intents are dropped.
    pub fn stop(&self) {
        self.core.token.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
    }

    /// Defer restarts and shutdowns until the returned guard (and every other
    /// open guard) is dropped.
    pub fn suspend_restart(&self, disable_logging: bool) -> RestartSuspension {
        let mut state = self.core.shared.lock();
        state.suspend_depth += 1;
        if disable_logging {
            state.quiet_depth += 1;
        } else {
            debug!("Restarts suspended (depth {})", state.suspend_depth);
        }
        RestartSuspension {
            shared: Arc::clone(&self.core.shared),
            quiet: disable_logging,
        }
    }

    /// Whether a shutdown has already been signalled.
    pub fn is_shutdown_scheduled(&self) -> bool {
        self.core.shared.lock().shutdown_scheduled
    }

    /// Re-read the watch lists from `host.json`.
    pub fn refresh_watch_settings(&self) {
        self.core.refresh_settings();
    }

    /// Classify a script file event.
    pub fn classify(&self, event: &FileEvent) -> Option<RestartIntent> {
        self.core.classify(event)
    }
}

impl Drop for FileMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl MonitorCore {
    fn refresh_settings(&self) {
        let effective = match self.config.with_host_json() {
            Ok(effective) => effective,
            Err(e) => {
                warn!("Keeping previous watch settings: {}", e);
                return;
            }
        };
        let settings = WatchSettings::from_config(&effective);
        let mut current = self.settings.write().unwrap_or_else(|e| e.into_inner());
        if *current != settings {
            debug!("Watch settings updated: {:?}", settings);
            *current = settings;
        }
    }

    fn settings(&self) -> WatchSettings {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn classify(&self, event: &FileEvent) -> Option<RestartIntent> {
        if event.name.eq_ignore_ascii_case(APP_OFFLINE_FILE_NAME) {
            return Some(match event.kind {
                FileChangeKind::Deleted => RestartIntent::Restart,
                _ => RestartIntent::Shutdown,
            });
        }

        let settings = self.settings();
        let in_watched_directory = self
            .parent_top_directory(&event.path)
            .is_some_and(|dir| settings.directories.iter().any(|w| w.eq_ignore_ascii_case(&dir)));

        let reason = if in_watched_directory {
            "Watched directory"
        } else if settings.files.iter().any(|f| f.eq_ignore_ascii_case(&event.name)) {
            "Watched file"
        } else if self.function_directories_changed(event) {
            "Function directory"
        } else {
            return None;
        };

        let intent = if is_assembly(&event.path) {
            RestartIntent::Shutdown
        } else {
            RestartIntent::Restart
        };
        info!(
            "{} change of type '{:?}' detected for '{}'",
            reason,
            event.kind,
            event.path.display()
        );
        Some(intent)
    }

    fn intent_for(&self, event: &ScriptEvent) -> Option<RestartIntent> {
        match event {
            ScriptEvent::File(file) if self.settings().enabled => self.classify(file),
            ScriptEvent::File(_) => None,
            ScriptEvent::HostRestart(e) => {
                info!("Host restart requested by '{}'", e.source);
                Some(RestartIntent::Restart)
            }
            ScriptEvent::HostShutdown(e) => {
                info!("Host shutdown requested by '{}'", e.source);
                Some(RestartIntent::Shutdown)
            }
        }
    }

    /// First directory below the root that contains `path`, if `path` is not
    /// itself a top-level entry.
    fn parent_top_directory(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.config.root_script_path).ok()?;
        let mut components = relative.components().filter(|c| matches!(c, Component::Normal(_)));
        let first = components.next()?;
        components.next()?;
        Some(first.as_os_str().to_string_lossy().into_owned())
    }

    fn function_directories_changed(&self, event: &FileEvent) -> bool {
        if event.kind != FileChangeKind::Deleted && !event.path.is_dir() {
            return false;
        }
        let current = top_level_directories(&self.config.root_script_path);
        let mut snapshot = self.directory_snapshot.lock().unwrap_or_else(|e| e.into_inner());
        if *snapshot == current {
            return false;
        }
        *snapshot = current;
        true
    }

    async fn ingest(&self, mut subscription: Subscription) {
        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => break,
                event = subscription.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Some(intent) = self.intent_for(&event) {
                self.schedule(intent);
            }
        }
        debug!("Change ingest stopped");
    }

    fn schedule(&self, intent: RestartIntent) {
        let deadline = Instant::now() + self.debounce;
        {
            let mut state = self.shared.lock();
            match intent {
                RestartIntent::Restart => state.restart_deadline = Some(deadline),
                RestartIntent::Shutdown => state.shutdown_deadline = Some(deadline),
            }
        }
        self.shared.wake.notify_one();
    }

    async fn drive(&self) {
        loop {
            let (flush, next) = {
                let mut state = self.shared.lock();
                let next = match (state.restart_deadline, state.shutdown_deadline) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                (state.flush.take(), next)
            };

            if let Some(intent) = flush {
                self.execute(intent).await;
                continue;
            }

            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = self.shared.wake.notified() => {}
                _ = sleep_until(next) => {
                    if let Some(intent) = self.take_due() {
                        self.execute(intent).await;
                    }
                }
            }
        }
        debug!("Restart driver stopped");
    }

    fn take_due(&self) -> Option<RestartIntent> {
        let now = Instant::now();
        let mut state = self.shared.lock();

        let mut fired = None;
        if state.shutdown_deadline.is_some_and(|d| d <= now) {
            state.shutdown_deadline = None;
            fired = Some(RestartIntent::Shutdown);
        }
        if state.restart_deadline.is_some_and(|d| d <= now) {
            state.restart_deadline = None;
            fired = fired.max(Some(RestartIntent::Restart));
        }
        let intent = fired?;

        if state.suspend_depth > 0 {
            if state.quiet_depth == 0 {
                info!("{:?} deferred while restarts are suspended", intent);
            }
            state.queued = state.queued.max(Some(intent));
            return None;
        }
        Some(intent)
    }

    async fn execute(&self, intent: RestartIntent) {
        match intent {
            RestartIntent::Shutdown => {
                self.shared.lock().shutdown_scheduled = true;
                info!("Host configuration has changed. Signaling shutdown.");
                self.lifetime.stop_application();
            }
            RestartIntent::Restart => {
                if self.shared.lock().shutdown_scheduled {
                    debug!("Restart suppressed; shutdown already scheduled");
                    return;
                }
                info!("Host configuration has changed. Signaling restart.");
                self.refresh_settings();
                if let Err(e) = self.restarter.restart_host().await {
                    error!("Host restart failed: {}", e);
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn is_assembly(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ASSEMBLY_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
}

fn top_level_directories(root: &Path) -> Vec<String> {
    let mut directories: Vec<String> = std::fs::read_dir(root)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    directories.sort();
    directories
}

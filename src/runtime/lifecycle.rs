//! Host lifecycle state machine.
//!
//! [`HostManager`] owns the single active [`ExecutionEngine`] and performs
//! hot swaps:
//!
//! ```text
//!   build new ──► start new ──► swap active ──► notify ──► stop old
//!       │             │
//!       └── failure ──┴──► state = Error, last_error set, old keeps serving
//! ```
//!
//! Transitions are serialized. A restart requested while another one is in
//! flight is coalesced into it.

use crate::error::HostError;
use crate::runtime::config::HostConfig;
use crate::runtime::engine::{EngineBuilder, ExecutionEngine};
use crate::runtime::monitor::HostRestarter;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// State of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HostState {
    /// Constructed, never started.
    Default,
    /// An engine is being built and started.
    Starting,
    /// An engine is active.
    Running,
    /// The active engine is being stopped.
    Stopping,
    /// No engine is active and none will be started by restarts.
    Stopped,
    /// The last build or start failed.
    Error,
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HostState::Default => "Default",
            HostState::Starting => "Starting",
            HostState::Running => "Running",
            HostState::Stopping => "Stopping",
            HostState::Stopped => "Stopped",
            HostState::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Whether this host instance is the primary of its app.
#[derive(Debug, Default)]
pub struct PrimaryHostState {
    primary: AtomicBool,
}

impl PrimaryHostState {
    /// Create with the given initial value.
    pub fn new(primary: bool) -> Self {
        Self {
            primary: AtomicBool::new(primary),
        }
    }

    /// Whether this instance is primary.
    pub fn is_primary(&self) -> bool {
        self.primary.load(Ordering::Acquire)
    }

    /// Update the primary flag.
    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::Release);
    }
}

/// Raised whenever the active engine changes.
#[derive(Clone)]
pub struct ActiveHostChanged {
    /// The instance that was active before.
    pub previous: Option<Arc<dyn ExecutionEngine>>,
    /// The instance that is active now.
    pub current: Option<Arc<dyn ExecutionEngine>>,
}

impl std::fmt::Debug for ActiveHostChanged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveHostChanged")
            .field("previous", &self.previous.as_ref().map(|e| e.instance_id()))
            .field("current", &self.current.as_ref().map(|e| e.instance_id()))
            .finish()
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the active engine and drives its lifecycle.
pub struct HostManager {
    builder: Arc<dyn EngineBuilder>,
    primary: Arc<PrimaryHostState>,
    state: watch::Sender<HostState>,
    last_error: Mutex<Option<HostError>>,
    active: RwLock<Option<Arc<dyn ExecutionEngine>>>,
    changes: broadcast::Sender<ActiveHostChanged>,
    transition: tokio::sync::Mutex<()>,
    restart_in_flight: AtomicBool,
    stop_timeout: Duration,
}

impl HostManager {
    /// Create a manager that builds engines with `builder`.
    pub fn new(builder: Arc<dyn EngineBuilder>, primary: Arc<PrimaryHostState>, config: &HostConfig) -> Self {
        let (state, _) = watch::channel(HostState::Default);
        let (changes, _) = broadcast::channel(16);
        Self {
            builder,
            primary,
            state,
            last_error: Mutex::new(None),
            active: RwLock::new(None),
            changes,
            transition: tokio::sync::Mutex::new(()),
            restart_in_flight: AtomicBool::new(false),
            stop_timeout: config.host_stop_timeout_duration(),
        }
    }

    /// Current state.
    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<HostState> {
        self.state.subscribe()
    }

    /// The error that put the host into [`HostState::Error`], if any.
    pub fn last_error(&self) -> Option<HostError> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The active engine, if any.
    pub fn active_host(&self) -> Option<Arc<dyn ExecutionEngine>> {
        self.active.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Receive [`ActiveHostChanged`] notifications.
    pub fn subscribe_active_host_changed(&self) -> broadcast::Receiver<ActiveHostChanged> {
        self.changes.subscribe()
    }

    /// Whether triggers should be synchronized from this instance right now.
    pub fn should_sync_triggers(&self) -> bool {
        self.primary.is_primary() && self.state() == HostState::Running
    }

    /// Build and start the first engine.
    pub async fn start(&self) -> Result<(), HostError> {
        let _transition = self.transition.lock().await;
        if matches!(self.state(), HostState::Running | HostState::Starting) {
            debug!("Host already {}", self.state());
            return Ok(());
        }

        info!("Starting host");
        self.set_state(HostState::Starting);
        self.activate().await
    }

    /// Replace the active engine with a freshly built one.
    ///
    /// No-op while stopping or stopped. Coalesced into a restart already in
    /// progress.
    pub async fn restart_host(&self) -> Result<(), HostError> {
        if self.is_shutting_down() {
            debug!("Ignoring restart while host is {}", self.state());
            return Ok(());
        }
        if self.restart_in_flight.swap(true, Ordering::AcqRel) {
            info!("Host restart already in progress; request coalesced");
            return Ok(());
        }
        let _in_flight = InFlight(&self.restart_in_flight);

        let _transition = self.transition.lock().await;
        if self.is_shutting_down() {
            debug!("Ignoring restart while host is {}", self.state());
            return Ok(());
        }

        info!("Restarting host");
        self.set_state(HostState::Starting);
        self.activate().await
    }

    /// Stop the active engine. Restarts are ignored afterwards.
    pub async fn stop(&self) -> Result<(), HostError> {
        let _transition = self.transition.lock().await;
        if self.state() == HostState::Stopped {
            return Ok(());
        }

        info!("Stopping host");
        self.set_state(HostState::Stopping);
        let previous = self.swap_active(None);
        let result = match previous {
            Some(old) => {
                let _ = self.changes.send(ActiveHostChanged {
                    previous: Some(old.clone()),
                    current: None,
                });
                self.stop_instance(old).await
            }
            None => Ok(()),
        };
        self.set_state(HostState::Stopped);
        result
    }

    fn is_shutting_down(&self) -> bool {
        matches!(self.state(), HostState::Stopping | HostState::Stopped)
    }

    async fn activate(&self) -> Result<(), HostError> {
        let engine = match self.builder.build().await {
            Ok(engine) => engine,
            Err(e) => return Err(self.fail(e)),
        };

        if let Err(e) = engine.start().await {
            if let Err(stop_error) = engine.stop().await {
                debug!("Failed instance {} did not stop cleanly: {}", engine.instance_id(), stop_error);
            }
            return Err(self.fail(e));
        }

        let previous = self.swap_active(Some(engine.clone()));
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.set_state(HostState::Running);
        let _ = self.changes.send(ActiveHostChanged {
            previous: previous.clone(),
            current: Some(engine.clone()),
        });
        info!("Host instance {} is active", engine.instance_id());

        if let Some(old) = previous {
            if let Err(e) = self.stop_instance(old).await {
                warn!("Ignoring error from previous host instance: {}", e);
            }
        }
        Ok(())
    }

    fn fail(&self, error: HostError) -> HostError {
        error!("Host {} failed: {}", error.as_label(), error);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.clone());
        self.set_state(HostState::Error);
        error
    }

    async fn stop_instance(&self, engine: Arc<dyn ExecutionEngine>) -> Result<(), HostError> {
        let id = engine.instance_id();
        match tokio::time::timeout(self.stop_timeout, engine.stop()).await {
            Ok(Ok(())) => {
                debug!("Host instance {} stopped", id);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(HostError::Stop(format!(
                "instance {} did not stop within {:?}",
                id, self.stop_timeout
            ))),
        }
    }

    fn swap_active(&self, engine: Option<Arc<dyn ExecutionEngine>>) -> Option<Arc<dyn ExecutionEngine>> {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *active, engine)
    }

    fn set_state(&self, state: HostState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Host state {} -> {}", previous, state);
        }
    }
}

#[async_trait]
impl HostRestarter for HostManager {
    async fn restart_host(&self) -> Result<(), HostError> {
        HostManager::restart_host(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::metadata::FunctionMetadata;
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    #[derive(Default)]
    struct FakeEngine {
        id: u64,
        fail_start: bool,
        hang_on_stop: bool,
        started: AtomicBool,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl ExecutionEngine for FakeEngine {
        fn instance_id(&self) -> u64 {
            self.id
        }

        fn functions(&self) -> &[FunctionMetadata] {
            &[]
        }

        async fn start(&self) -> Result<(), HostError> {
            if self.fail_start {
                return Err(HostError::Start("listener refused".into()));
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), HostError> {
            if self.hang_on_stop {
                std::future::pending::<()>().await;
            }
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBuilder {
        next_id: AtomicU64,
        builds: AtomicUsize,
        fail_build: AtomicBool,
        fail_start: AtomicBool,
        hang_on_stop: AtomicBool,
        build_delay: Option<Duration>,
        built: Mutex<Vec<Arc<FakeEngine>>>,
    }

    impl FakeBuilder {
        fn engine(&self, index: usize) -> Arc<FakeEngine> {
            self.built.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl EngineBuilder for FakeBuilder {
        async fn build(&self) -> Result<Arc<dyn ExecutionEngine>, HostError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.build_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_build.load(Ordering::SeqCst) {
                return Err(HostError::Build("bad configuration".into()));
            }
            let engine = Arc::new(FakeEngine {
                id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                fail_start: self.fail_start.load(Ordering::SeqCst),
                hang_on_stop: self.hang_on_stop.load(Ordering::SeqCst),
                ..FakeEngine::default()
            });
            self.built.lock().unwrap().push(engine.clone());
            Ok(engine)
        }
    }

    fn manager(builder: Arc<FakeBuilder>, primary: bool) -> HostManager {
        HostManager::new(
            builder,
            Arc::new(PrimaryHostState::new(primary)),
            &HostConfig::new().host_stop_timeout(Duration::from_secs(1)),
        )
    }

    #[tokio::test]
    async fn test_start_runs_engine() {
        let builder = Arc::new(FakeBuilder::default());
        let host = manager(builder.clone(), true);
        assert_eq!(host.state(), HostState::Default);
        assert!(!host.should_sync_triggers());

        host.start().await.unwrap();
        assert_eq!(host.state(), HostState::Running);
        assert_eq!(host.active_host().map(|e| e.instance_id()), Some(1));
        assert!(builder.engine(0).started.load(Ordering::SeqCst));
        assert!(host.should_sync_triggers());

        host.start().await.unwrap();
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_sync_triggers_requires_primary() {
        let primary = Arc::new(PrimaryHostState::new(false));
        let host = HostManager::new(Arc::new(FakeBuilder::default()), primary.clone(), &HostConfig::new());
        host.start().await.unwrap();
        assert!(!host.should_sync_triggers());

        primary.set_primary(true);
        assert!(host.should_sync_triggers());
    }

    #[tokio::test]
    async fn test_restart_hot_swaps() {
        let builder = Arc::new(FakeBuilder::default());
        let host = manager(builder.clone(), true);
        host.start().await.unwrap();
        let mut changes = host.subscribe_active_host_changed();

        host.restart_host().await.unwrap();
        let change = changes.recv().await.unwrap();
        assert_eq!(change.previous.map(|e| e.instance_id()), Some(1));
        assert_eq!(change.current.map(|e| e.instance_id()), Some(2));
        assert!(builder.engine(0).stopped.load(Ordering::SeqCst));
        assert!(builder.engine(1).started.load(Ordering::SeqCst));
        assert_eq!(host.state(), HostState::Running);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_instance() {
        let builder = Arc::new(FakeBuilder::default());
        let host = manager(builder.clone(), true);
        host.start().await.unwrap();

        builder.fail_build.store(true, Ordering::SeqCst);
        let err = host.restart_host().await.unwrap_err();
        assert_eq!(err, HostError::Build("bad configuration".into()));
        assert_eq!(host.state(), HostState::Error);
        assert_eq!(host.last_error(), Some(err));
        assert_eq!(host.active_host().map(|e| e.instance_id()), Some(1));
        assert!(!builder.engine(0).stopped.load(Ordering::SeqCst));
        assert!(!host.should_sync_triggers());

        builder.fail_build.store(false, Ordering::SeqCst);
        host.restart_host().await.unwrap();
        assert_eq!(host.state(), HostState::Running);
        assert_eq!(host.last_error(), None);
        assert_eq!(host.active_host().map(|e| e.instance_id()), Some(2));
    }

    #[tokio::test]
    async fn test_failed_start_stops_new_instance() {
        let builder = Arc::new(FakeBuilder::default());
        let host = manager(builder.clone(), true);
        host.start().await.unwrap();

        builder.fail_start.store(true, Ordering::SeqCst);
        let err = host.restart_host().await.unwrap_err();
        assert_eq!(err.as_label(), "host_start");
        assert!(builder.engine(1).stopped.load(Ordering::SeqCst));
        assert_eq!(host.active_host().map(|e| e.instance_id()), Some(1));
        assert_eq!(host.state(), HostState::Error);
    }

    #[tokio::test]
    async fn test_restart_after_stop_is_noop() {
        let builder = Arc::new(FakeBuilder::default());
        let host = manager(builder.clone(), true);
        host.start().await.unwrap();
        let mut states = host.subscribe_state();

        host.stop().await.unwrap();
        assert_eq!(*states.borrow_and_update(), HostState::Stopped);
        assert!(host.active_host().is_none());
        assert!(builder.engine(0).stopped.load(Ordering::SeqCst));

        host.restart_host().await.unwrap();
        assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
        assert_eq!(host.state(), HostState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_restarts_coalesce() {
        let builder = Arc::new(FakeBuilder {
            build_delay: Some(Duration::from_millis(100)),
            ..FakeBuilder::default()
        });
        let host = manager(builder.clone(), true);
        host.start().await.unwrap();

        let (a, b) = tokio::join!(host.restart_host(), host.restart_host());
        a.unwrap();
        b.unwrap();
        assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
        assert_eq!(host.active_host().map(|e| e.instance_id()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timeout() {
        let builder = Arc::new(FakeBuilder::default());
        builder.hang_on_stop.store(true, Ordering::SeqCst);
        let host = manager(builder, true);
        host.start().await.unwrap();

        let err = host.stop().await.unwrap_err();
        assert_eq!(err.as_label(), "host_stop");
        assert_eq!(host.state(), HostState::Stopped);
    }
}

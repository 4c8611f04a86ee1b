//! Fezz Host - control plane binary
//!
//! Indexes the function app at the given root (first argument, or
//! `FEZZ_SCRIPT_ROOT`, or the current directory), starts the script host and
//! restarts it whenever the app changes.

use fezz_host::events::SCRIPT_FILES_SOURCE;
use fezz_host::prelude::*;
use fezz_host::worker::load_worker_configs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const SCRIPT_ROOT_VARIABLE: &str = "FEZZ_SCRIPT_ROOT";
const WORKERS_DIR_VARIABLE: &str = "FEZZ_WORKERS_DIR";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let root = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(SCRIPT_ROOT_VARIABLE).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = HostConfig::new().root_script_path(root);
    if let Ok(dir) = std::env::var(WORKERS_DIR_VARIABLE) {
        config = config.workers_dir(dir);
    }
    // The manager and monitor re-read host.json themselves on every reload
    let effective = config.with_host_json()?;

    tracing::info!(
        "Starting Fezz Host for '{}' (file watching: {})",
        config.root_script_path.display(),
        effective.file_watching_enabled
    );

    let worker_configs = match &config.workers_dir {
        Some(dir) => load_worker_configs(dir)?,
        None => Vec::new(),
    };
    tracing::info!("Loaded {} worker configs", worker_configs.len());

    // Metadata pipeline
    let diagnostics = Arc::new(Diagnostics::default());
    let host_provider = Arc::new(HostFunctionMetadataProvider::new(&config.root_script_path));
    let aggregate = Arc::new(AggregateFunctionMetadataProvider::new(
        host_provider,
        diagnostics.clone(),
        &config,
    ));
    let manager = Arc::new(
        FunctionMetadataManager::new(aggregate, Arc::new(SystemEnvironment), diagnostics, &config)
            .with_worker_configs(worker_configs),
    );

    // Lifecycle
    let host = Arc::new(HostManager::new(
        Arc::new(ScriptHostBuilder::new(manager)),
        Arc::new(PrimaryHostState::new(true)),
        &config,
    ));
    let lifetime = CancellationToken::new();
    let bus = ChangeEventBus::new(config.event_bus_capacity);

    let monitor = FileMonitor::new(&config, &bus, host.clone(), Arc::new(lifetime.clone()));
    monitor.start();

    // Always polled; the monitor applies fileWatchingEnabled as host.json changes
    let watcher = PollingFileWatcher::new(
        &config.root_script_path,
        SCRIPT_FILES_SOURCE,
        config.poll_interval(),
        bus.clone(),
    )
    .spawn(lifetime.child_token());

    if let Err(e) = host.start().await {
        tracing::error!("Initial host start failed: {}", e);
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C"),
        _ = lifetime.cancelled() => tracing::info!("Application shutdown requested"),
    }

    monitor.stop();
    lifetime.cancel();
    let _ = watcher.await;
    host.stop().await?;

    tracing::info!("Fezz Host stopped");
    Ok(())
}

//! Host runtime: configuration, engines, lifecycle and the restart controller.

pub mod config;
pub mod engine;
pub mod environment;
pub mod lifecycle;
pub mod monitor;

pub use config::{HostConfig, HOST_JSON_FILE_NAME};
pub use engine::{EngineBuilder, ExecutionEngine, ScriptHost, ScriptHostBuilder};
pub use environment::{Environment, MemoryEnvironment, SystemEnvironment};
pub use lifecycle::{ActiveHostChanged, HostManager, HostState, PrimaryHostState};
pub use monitor::{
    ApplicationLifetime, FileMonitor, HostRestarter, RestartIntent, RestartSuspension,
    APP_OFFLINE_FILE_NAME,
};

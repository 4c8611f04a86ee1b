//! # Fezz Host - Function indexing and hot-reload control plane
//!
//! Fezz Host is the control plane of a multi-language function host. It
//! discovers the functions of an app, validates and merges their metadata
//! from several sources, and keeps a single execution engine serving them,
//! rebuilding it whenever the app changes on disk.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      PollingFileWatcher                             │
//! │                 (script root, ScriptFiles events)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │  ChangeEventBus
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  FileMonitor: classify ──► debounce ──► suspend? ──► restart/stop   │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │  HostRestarter
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  HostManager: build ──► start ──► swap active ──► stop previous     │
//! │  ┌─────────────────────────────────────────────────────────────┐   │
//! │  │               FunctionMetadataManager                        │   │
//! │  │  ┌────────────────────┐  ┌──────────┐  ┌────────────────┐   │   │
//! │  │  │ Aggregate provider │  │ Provider │  │   Provider     │   │   │
//! │  │  │ (worker │ host)    │  │   (A)    │  │    ...         │   │   │
//! │  │  └────────────────────┘  └──────────┘  └────────────────┘   │   │
//! │  └─────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fezz_host::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = HostConfig::new().root_script_path("./app");
//!     let diagnostics = Arc::new(Diagnostics::default());
//!
//!     let host_provider = Arc::new(HostFunctionMetadataProvider::new(&config.root_script_path));
//!     let aggregate = Arc::new(AggregateFunctionMetadataProvider::new(
//!         host_provider,
//!         diagnostics.clone(),
//!         &config,
//!     ));
//!     let manager = Arc::new(FunctionMetadataManager::new(
//!         aggregate,
//!         Arc::new(SystemEnvironment),
//!         diagnostics,
//!         &config,
//!     ));
//!
//!     let host = HostManager::new(
//!         Arc::new(ScriptHostBuilder::new(manager)),
//!         Arc::new(PrimaryHostState::new(true)),
//!         &config,
//!     );
//!     host.start().await?;
//!     host.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Function Metadata
//!
//! Every load goes through the same pipeline:
//!
//! 1. **Index**: the worker reports its functions, or the host scans
//!    `function.json` files (with fallback between the two)
//! 2. **Merge**: external providers contribute more functions
//! 3. **Validate**: duplicates fail the load, functions without a script are
//!    dropped with an error
//! 4. **Filter**: the `functions` allow list from `host.json` applies last
//!
//! ## Restarts
//!
//! Changes to `host.json`, `function.json`, watched directories or the set of
//! function directories restart the host after a quiet period. Creating
//! `app_offline.htm` or replacing an assembly shuts the application down.

pub mod control_plane;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod function;
pub mod runtime;
pub mod worker;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::control_plane::{
        AggregateFunctionMetadataProvider, FunctionIndex, FunctionMetadataManager,
        FunctionMetadataProvider, FunctionProvider, HostFunctionMetadataProvider,
        MemoryFunctionProvider,
    };
    pub use crate::diagnostics::Diagnostics;
    pub use crate::error::{HostError, MetadataError, ValidationError};
    pub use crate::events::{ChangeEventBus, FileEvent, PollingFileWatcher, ScriptEvent};
    pub use crate::function::{BindingMetadata, FunctionMetadata, RawFunctionMetadata};
    pub use crate::runtime::{
        ExecutionEngine, FileMonitor, HostConfig, HostManager, HostState, PrimaryHostState,
        ScriptHostBuilder, SystemEnvironment,
    };
    pub use crate::worker::{InvocationDispatcher, WorkerConfig};
    pub use async_trait::async_trait;
}

// Re-export for convenience
pub use control_plane::FunctionMetadataManager;
pub use error::{HostError, MetadataError, ValidationError};
pub use function::FunctionMetadata;
pub use runtime::{FileMonitor, HostConfig, HostManager};

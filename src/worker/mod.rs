//! Language worker descriptions and the dispatcher seam.

pub mod config;
pub mod dispatcher;

pub use config::{load_worker_configs, WorkerConfig, WORKER_CONFIG_FILE_NAME};
pub use dispatcher::InvocationDispatcher;

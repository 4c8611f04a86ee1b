//! Language worker configuration.
//!
//! Each worker ships a `worker.config.json` in its own directory under the
//! workers root:
//!
//! ```json
//! {
//!   "description": {
//!     "language": "node",
//!     "extensions": [".js", ".mjs"],
//!     "defaultExecutablePath": "node",
//!     "workerIndexing": "true"
//!   }
//! }
//! ```

use crate::error::MetadataError;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Name of the worker description file.
pub const WORKER_CONFIG_FILE_NAME: &str = "worker.config.json";

/// Description of one language worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Language identifier, e.g. `node`.
    pub language: String,
    /// Script extensions the worker claims, with or without a leading dot.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Executable used to launch the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_executable_path: Option<String>,
    /// Worker can report its own function metadata.
    #[serde(default, deserialize_with = "bool_or_string")]
    pub worker_indexing: bool,
}

#[derive(Deserialize)]
struct WorkerConfigFile {
    description: WorkerConfig,
}

impl WorkerConfig {
    /// Create a new worker config.
    pub fn new<I, S>(language: impl Into<String>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            language: language.into(),
            extensions: extensions.into_iter().map(Into::into).collect(),
            default_executable_path: None,
            worker_indexing: false,
        }
    }

    /// Enable or disable worker indexing.
    pub fn with_worker_indexing(mut self, enabled: bool) -> Self {
        self.worker_indexing = enabled;
        self
    }

    /// Set the executable path.
    pub fn with_executable(mut self, path: impl Into<String>) -> Self {
        self.default_executable_path = Some(path.into());
        self
    }

    /// Whether the worker claims `extension` (case-insensitive, dot optional).
    pub fn claims_extension(&self, extension: &str) -> bool {
        let wanted = extension.trim_start_matches('.');
        self.extensions
            .iter()
            .any(|ext| ext.trim_start_matches('.').eq_ignore_ascii_case(wanted))
    }
}

/// Load every `worker.config.json` found one level below `workers_dir`.
///
/// Unreadable or malformed descriptions are skipped with a warning; a missing
/// `workers_dir` yields an empty list.
pub fn load_worker_configs(workers_dir: &Path) -> Result<Vec<WorkerConfig>, MetadataError> {
    if !workers_dir.exists() {
        debug!("Workers directory '{}' not found", workers_dir.display());
        return Ok(Vec::new());
    }

    let entries =
        std::fs::read_dir(workers_dir).map_err(|e| MetadataError::io(workers_dir, &e))?;

    let mut configs = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path().join(WORKER_CONFIG_FILE_NAME);
        if !path.is_file() {
            continue;
        }

        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                serde_json::from_str::<WorkerConfigFile>(&text).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(file) => {
                debug!("Loaded worker config for language '{}'", file.description.language);
                configs.push(file.description);
            }
            Err(e) => warn!("Skipping worker config '{}': {}", path.display(), e),
        }
    }

    configs.sort_by(|a, b| a.language.cmp(&b.language));
    Ok(configs)
}

fn bool_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => Ok(text.trim().eq_ignore_ascii_case("true")),
    }
}

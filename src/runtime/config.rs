//! Host configuration.

use crate::error::MetadataError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Name of the app-level configuration file.
pub const HOST_JSON_FILE_NAME: &str = "host.json";

/// Files whose change always restarts the host.
pub const DEFAULT_WATCH_FILES: &[&str] = &["host.json", "function.json", "proxies.json"];

/// Directories that are always watched in addition to the configured ones.
pub const DEFAULT_WATCH_DIRECTORIES: &[&str] = &["Host", "node_modules"];

/// Configuration for the function host control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Root of the function app.
    pub root_script_path: PathBuf,
    /// Directory holding one sub-directory per language worker.
    pub workers_dir: Option<PathBuf>,
    /// Extra top-level directories whose changes restart the host.
    pub watch_directories: Vec<String>,
    /// File names whose changes restart the host.
    pub watch_files: Vec<String>,
    /// Whether file changes are acted upon at all.
    pub file_watching_enabled: bool,
    /// Optional allow list of function names.
    pub functions: Option<Vec<String>>,
    /// Treat functions without a script as valid (an HTTP worker serves them).
    pub http_worker: bool,
    /// Quiet period before a restart or shutdown fires, in milliseconds.
    pub restart_debounce_ms: u64,
    /// Delay before the mixed-app warning is recorded, in milliseconds.
    pub mixed_app_cooldown_ms: u64,
    /// Bound on the worker metadata round trip, in milliseconds.
    pub worker_metadata_timeout_ms: u64,
    /// Bound on each external provider call, in milliseconds.
    pub metadata_provider_timeout_ms: u64,
    /// Bound on stopping an engine instance, in milliseconds.
    pub host_stop_timeout_ms: u64,
    /// Poll interval of the file watcher, in milliseconds.
    pub poll_interval_ms: u64,
    /// Capacity of the change event bus.
    pub event_bus_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            root_script_path: PathBuf::from("."),
            workers_dir: None,
            watch_directories: Vec::new(),
            watch_files: DEFAULT_WATCH_FILES.iter().map(|s| s.to_string()).collect(),
            file_watching_enabled: true,
            functions: None,
            http_worker: false,
            restart_debounce_ms: 500,
            mixed_app_cooldown_ms: 60_000,
            worker_metadata_timeout_ms: 30_000,
            metadata_provider_timeout_ms: 30_000,
            host_stop_timeout_ms: 10_000,
            poll_interval_ms: 1_000,
            event_bus_capacity: 1024,
        }
    }
}

/// Subset of `host.json` that the control plane reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostJson {
    watch_directories: Option<Vec<String>>,
    watch_files: Option<Vec<String>>,
    file_watching_enabled: Option<bool>,
    functions: Option<Vec<String>>,
}

impl HostConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the root script path.
    pub fn root_script_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_script_path = path.into();
        self
    }

    /// Set the workers directory.
    pub fn workers_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workers_dir = Some(path.into());
        self
    }

    /// Add a watched directory.
    pub fn watch_directory(mut self, directory: impl Into<String>) -> Self {
        self.watch_directories.push(directory.into());
        self
    }

    /// Add a watched file name.
    pub fn watch_file(mut self, file: impl Into<String>) -> Self {
        self.watch_files.push(file.into());
        self
    }

    /// Enable or disable file watching.
    pub fn file_watching(mut self, enabled: bool) -> Self {
        self.file_watching_enabled = enabled;
        self
    }

    /// Set the function allow list.
    pub fn allow_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.functions = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Mark the app as served by an HTTP worker.
    pub fn http_worker(mut self, enabled: bool) -> Self {
        self.http_worker = enabled;
        self
    }

    /// Set the restart debounce window.
    pub fn restart_debounce(mut self, debounce: Duration) -> Self {
        self.restart_debounce_ms = debounce.as_millis() as u64;
        self
    }

    /// Set the mixed-app cool-down.
    pub fn mixed_app_cooldown(mut self, cooldown: Duration) -> Self {
        self.mixed_app_cooldown_ms = cooldown.as_millis() as u64;
        self
    }

    /// Set the worker metadata timeout.
    pub fn worker_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.worker_metadata_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the external provider timeout.
    pub fn metadata_provider_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_provider_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the engine stop timeout.
    pub fn host_stop_timeout(mut self, timeout: Duration) -> Self {
        self.host_stop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Restart debounce as a [`Duration`].
    pub fn restart_debounce_duration(&self) -> Duration {
        Duration::from_millis(self.restart_debounce_ms)
    }

    /// Mixed-app cool-down as a [`Duration`].
    pub fn mixed_app_cooldown_duration(&self) -> Duration {
        Duration::from_millis(self.mixed_app_cooldown_ms)
    }

    /// Worker metadata timeout as a [`Duration`].
    pub fn worker_metadata_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.worker_metadata_timeout_ms)
    }

    /// Provider timeout as a [`Duration`].
    pub fn metadata_provider_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.metadata_provider_timeout_ms)
    }

    /// Engine stop timeout as a [`Duration`].
    pub fn host_stop_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.host_stop_timeout_ms)
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Configured watch directories plus the ones that are always watched.
    pub fn all_watch_directories(&self) -> Vec<String> {
        let mut directories = self.watch_directories.clone();
        for default in DEFAULT_WATCH_DIRECTORIES {
            if !directories.iter().any(|d| d.eq_ignore_ascii_case(default)) {
                directories.push(default.to_string());
            }
        }
        directories
    }

    /// Overlay `watchDirectories`, `watchFiles`, `fileWatchingEnabled` and
    /// `functions` from `<root>/host.json`, if present.
    pub fn apply_host_json(&mut self) -> Result<(), MetadataError> {
        let path = self.root_script_path.join(HOST_JSON_FILE_NAME);
        if !path.is_file() {
            debug!("No {} at '{}'", HOST_JSON_FILE_NAME, path.display());
            return Ok(());
        }

        let text = std::fs::read_to_string(&path).map_err(|e| MetadataError::io(&path, &e))?;
        self.apply_host_json_str(&path, &text)
    }

    /// A copy of this config with the current `host.json` overlaid.
    ///
    /// Keys absent from `host.json` keep this config's values, so callers
    /// holding the un-overlaid config see removals as well as edits.
    pub fn with_host_json(&self) -> Result<HostConfig, MetadataError> {
        let mut effective = self.clone();
        effective.apply_host_json()?;
        Ok(effective)
    }

    fn apply_host_json_str(&mut self, path: &Path, text: &str) -> Result<(), MetadataError> {
        let host_json: HostJson =
            serde_json::from_str(text).map_err(|e| MetadataError::Config {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        if let Some(directories) = host_json.watch_directories {
            self.watch_directories = directories;
        }
        if let Some(files) = host_json.watch_files {
            self.watch_files = files;
        }
        if let Some(enabled) = host_json.file_watching_enabled {
            self.file_watching_enabled = enabled;
        }
        if host_json.functions.is_some() {
            self.functions = host_json.functions;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostConfig::new();
        assert_eq!(config.restart_debounce_duration(), Duration::from_millis(500));
        assert_eq!(config.mixed_app_cooldown_duration(), Duration::from_secs(60));
        assert_eq!(config.host_stop_timeout_duration(), Duration::from_secs(10));
        assert_eq!(config.watch_files, vec!["host.json", "function.json", "proxies.json"]);
        assert!(config.file_watching_enabled);
        assert!(config.functions.is_none());
    }

    #[test]
    fn test_builder() {
        let config = HostConfig::new()
            .root_script_path("/app")
            .watch_directory("Shared")
            .allow_functions(["a", "b"])
            .restart_debounce(Duration::from_millis(50));

        assert_eq!(config.root_script_path, PathBuf::from("/app"));
        assert_eq!(config.all_watch_directories(), vec!["Shared", "Host", "node_modules"]);
        assert_eq!(config.functions, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(config.restart_debounce_ms, 50);
    }

    #[test]
    fn test_apply_host_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(HOST_JSON_FILE_NAME),
            r#"{"version":"2.0","watchDirectories":["Shared"],"functions":["Fn1"],"fileWatchingEnabled":false}"#,
        )
        .unwrap();

        let mut config = HostConfig::new().root_script_path(dir.path());
        config.apply_host_json().unwrap();
        assert_eq!(config.watch_directories, vec!["Shared"]);
        assert_eq!(config.functions, Some(vec!["Fn1".to_string()]));
        assert!(!config.file_watching_enabled);
        assert_eq!(config.watch_files.len(), 3);
    }

    #[test]
    fn test_apply_host_json_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(HOST_JSON_FILE_NAME), "{ nope").unwrap();
        let mut config = HostConfig::new().root_script_path(dir.path());
        assert!(matches!(
            config.apply_host_json(),
            Err(MetadataError::Config { .. })
        ));
    }

    #[test]
    fn test_missing_host_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HostConfig::new().root_script_path(dir.path());
        config.apply_host_json().unwrap();
        assert_eq!(config, HostConfig::new().root_script_path(dir.path()));
    }

    #[test]
    fn test_with_host_json_follows_edits() {
        let dir = tempfile::tempdir().unwrap();
        let base = HostConfig::new().root_script_path(dir.path());
        let path = dir.path().join(HOST_JSON_FILE_NAME);

        std::fs::write(&path, r#"{"functions":["Fn1"]}"#).unwrap();
        assert_eq!(base.with_host_json().unwrap().functions, Some(vec!["Fn1".to_string()]));

        std::fs::write(&path, r#"{"watchFiles":["host.json"]}"#).unwrap();
        let effective = base.with_host_json().unwrap();
        assert!(effective.functions.is_none());
        assert_eq!(effective.watch_files, vec!["host.json"]);
        assert!(base.functions.is_none());
    }
}

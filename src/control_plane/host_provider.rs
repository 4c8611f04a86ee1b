//! Host-side function discovery.
//!
//! Every sub-directory of the script root that contains a `function.json` is
//! a function named after the directory. Each one is validated on its own;
//! failures are collected per function and never stop the scan.

use crate::control_plane::provider::{add_function_error, FunctionErrors, FunctionMetadataProvider};
use crate::error::{MetadataError, ValidationError};
use crate::function::language::parse_language;
use crate::function::metadata::{FunctionMetadata, FunctionSource, RetryOptions};
use crate::function::script::{determine_primary_script_file, FUNCTION_CONFIG_FILE_NAME};
use crate::function::validation::{validate_binding_values, validate_function_name, validate_retry_options};
use crate::runtime::environment::{worker_runtime, Environment};
use crate::worker::WorkerConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// The parts of `function.json` the host reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FunctionJson {
    #[serde(default)]
    bindings: Vec<Value>,
    #[serde(default)]
    script_file: Option<String>,
    #[serde(default)]
    entry_point: Option<String>,
    #[serde(default)]
    retry: Option<Value>,
}

/// Result of scanning a script root.
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Functions that passed validation, in directory-name order.
    pub functions: Vec<FunctionMetadata>,
    /// Errors of the functions that did not.
    pub errors: FunctionErrors,
}

/// Scans the script root for `function.json` declarations.
#[derive(Debug)]
pub struct HostFunctionMetadataProvider {
    root: PathBuf,
    errors: Mutex<FunctionErrors>,
}

impl HostFunctionMetadataProvider {
    /// Create a provider scanning `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            errors: Mutex::new(FunctionErrors::new()),
        }
    }

    /// The scanned root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FunctionMetadataProvider for HostFunctionMetadataProvider {
    async fn get_function_metadata(
        &self,
        worker_configs: &[WorkerConfig],
        environment: &dyn Environment,
        force_refresh: bool,
    ) -> Result<Vec<FunctionMetadata>, MetadataError> {
        debug!("Scanning '{}' (force_refresh: {})", self.root.display(), force_refresh);

        let root = self.root.clone();
        let configs = worker_configs.to_vec();
        let runtime = worker_runtime(environment);
        let scan = tokio::task::spawn_blocking(move || {
            scan_function_directories(&root, &configs, runtime.as_deref())
        })
        .await
        .map_err(|e| MetadataError::Aborted(e.to_string()))??;

        info!(
            "Host indexing found {} functions ({} with errors)",
            scan.functions.len(),
            scan.errors.len()
        );
        *self.errors.lock().unwrap_or_else(|e| e.into_inner()) = scan.errors;
        Ok(scan.functions)
    }

    fn function_errors(&self) -> FunctionErrors {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Scan every function directory under `root`.
pub fn scan_function_directories(
    root: &Path,
    worker_configs: &[WorkerConfig],
    worker_runtime: Option<&str>,
) -> Result<ScanResult, MetadataError> {
    let mut result = ScanResult::default();
    if !root.is_dir() {
        debug!("Script root '{}' does not exist", root.display());
        return Ok(result);
    }

    let mut directories: Vec<PathBuf> = std::fs::read_dir(root)
        .map_err(|e| MetadataError::io(root, &e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.join(FUNCTION_CONFIG_FILE_NAME).is_file())
        .collect();
    directories.sort();

    for directory in directories {
        let name = directory
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match read_function_directory(&name, &directory, worker_configs, worker_runtime) {
            Ok(metadata) => result.functions.push(metadata),
            Err(e) => {
                debug!("Function '{}' excluded: {}", name, e.as_label());
                add_function_error(&mut result.errors, name, e.to_string());
            }
        }
    }

    Ok(result)
}

fn read_function_directory(
    name: &str,
    directory: &Path,
    worker_configs: &[WorkerConfig],
    worker_runtime: Option<&str>,
) -> Result<FunctionMetadata, ValidationError> {
    validate_function_name(name)?;

    let path = directory.join(FUNCTION_CONFIG_FILE_NAME);
    let text = std::fs::read_to_string(&path).map_err(|e| {
        ValidationError::Format(format!("Unable to read '{}': {}", path.display(), e))
    })?;
    let config: Value = serde_json::from_str(&text).map_err(|e| {
        ValidationError::Format(format!("Invalid {}: {}", FUNCTION_CONFIG_FILE_NAME, e))
    })?;

    parse_function_metadata(name, &config, directory, worker_configs, worker_runtime)
}

/// Build validated metadata from a parsed `function.json`.
pub fn parse_function_metadata(
    name: &str,
    config: &Value,
    directory: &Path,
    worker_configs: &[WorkerConfig],
    worker_runtime: Option<&str>,
) -> Result<FunctionMetadata, ValidationError> {
    let declaration: FunctionJson = serde_json::from_value(config.clone()).map_err(|e| {
        ValidationError::Format(format!("Invalid {}: {}", FUNCTION_CONFIG_FILE_NAME, e))
    })?;

    let bindings = validate_binding_values(&declaration.bindings)?;

    let retry = declaration
        .retry
        .map(serde_json::from_value::<RetryOptions>)
        .transpose()
        .map_err(|e| ValidationError::InvalidRetry(format!("Invalid retry options: {}", e)))?;
    validate_retry_options(retry.as_ref())?;

    let script_file = determine_primary_script_file(declaration.script_file.as_deref(), directory)?;
    let language = parse_language(script_file.as_deref(), worker_configs, worker_runtime);

    Ok(FunctionMetadata {
        name: name.to_string(),
        directory: Some(directory.to_path_buf()),
        script_file,
        entry_point: declaration.entry_point,
        language,
        bindings,
        retry,
        is_codeless: false,
        source: FunctionSource::Host,
    })
}

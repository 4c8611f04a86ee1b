//! Function metadata manager.
//!
//! Owns the app's current function set. Each load re-queries the primary
//! provider and every registered [`FunctionProvider`], merges the results and
//! publishes a new immutable [`FunctionIndex`]. A failed load leaves the
//! previous index in place.
//!
//! `host.json` is re-read on every load, so edits to its `functions` allow
//! list take effect on the next reload.

use crate::control_plane::provider::{
    add_function_error, FunctionErrors, FunctionMetadataProvider, FunctionProvider,
};
use crate::diagnostics::{codes, DiagnosticLevel, Diagnostics};
use crate::error::{MetadataError, UNDETERMINED_SCRIPT_FILE_MESSAGE};
use crate::function::metadata::{FunctionMetadata, FunctionSource};
use crate::runtime::config::HostConfig;
use crate::runtime::environment::Environment;
use crate::worker::WorkerConfig;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Immutable result of one metadata load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionIndex {
    /// Valid functions, sorted by name (case-sensitive, anonymous first).
    pub functions: Vec<FunctionMetadata>,
    /// Errors of the excluded functions.
    pub errors: FunctionErrors,
}

impl FunctionIndex {
    /// Look a function up by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&FunctionMetadata> {
        self.functions
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Number of valid functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether no function is valid.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Loads, merges and caches function metadata.
pub struct FunctionMetadataManager {
    provider: Arc<dyn FunctionMetadataProvider>,
    environment: Arc<dyn Environment>,
    diagnostics: Arc<Diagnostics>,
    worker_configs: RwLock<Vec<WorkerConfig>>,
    function_providers: RwLock<Vec<Arc<dyn FunctionProvider>>>,
    config: HostConfig,
    provider_timeout: Duration,
    current: RwLock<Arc<FunctionIndex>>,
    load_lock: tokio::sync::Mutex<()>,
}

impl FunctionMetadataManager {
    /// Create a manager over the primary `provider`.
    pub fn new(
        provider: Arc<dyn FunctionMetadataProvider>,
        environment: Arc<dyn Environment>,
        diagnostics: Arc<Diagnostics>,
        config: &HostConfig,
    ) -> Self {
        Self {
            provider,
            environment,
            diagnostics,
            worker_configs: RwLock::new(Vec::new()),
            function_providers: RwLock::new(Vec::new()),
            config: config.clone(),
            provider_timeout: config.metadata_provider_timeout_duration(),
            current: RwLock::new(Arc::new(FunctionIndex::default())),
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Set the worker configs passed to the primary provider.
    pub fn with_worker_configs(self, configs: Vec<WorkerConfig>) -> Self {
        self.set_worker_configs(configs);
        self
    }

    /// Replace the worker configs.
    pub fn set_worker_configs(&self, configs: Vec<WorkerConfig>) {
        *self.worker_configs.write().unwrap_or_else(|e| e.into_inner()) = configs;
    }

    /// Replace the external function providers used by the next load.
    pub fn set_function_providers(&self, providers: Vec<Arc<dyn FunctionProvider>>) {
        *self.function_providers.write().unwrap_or_else(|e| e.into_inner()) = providers;
    }

    /// Load the function set from scratch and publish it.
    pub async fn load_function_metadata(&self, force_refresh: bool) -> Result<Arc<FunctionIndex>, MetadataError> {
        let _guard = self.load_lock.lock().await;
        let effective = self.config.with_host_json()?;

        let worker_configs = self.worker_configs.read().unwrap_or_else(|e| e.into_inner()).clone();
        let providers = self
            .function_providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut functions = self
            .provider
            .get_function_metadata(&worker_configs, self.environment.as_ref(), force_refresh)
            .await?;
        let mut errors = self.provider.function_errors();

        for provider in &providers {
            let contributed = match tokio::time::timeout(self.provider_timeout, provider.get_function_metadata()).await {
                Ok(Ok(contributed)) => contributed,
                Ok(Err(e)) => {
                    self.diagnostics.record(
                        codes::PROVIDER_ERROR,
                        DiagnosticLevel::Warning,
                        format!("Function provider '{}' failed: {}", provider.name(), e),
                    );
                    continue;
                }
                Err(_) => {
                    self.diagnostics.record(
                        codes::PROVIDER_ERROR,
                        DiagnosticLevel::Warning,
                        format!(
                            "Function provider '{}' timed out after {:?}",
                            provider.name(),
                            self.provider_timeout
                        ),
                    );
                    continue;
                }
            };

            debug!("Provider '{}' contributed {} functions", provider.name(), contributed.len());
            functions.extend(contributed.into_iter().map(|mut function| {
                function.source = FunctionSource::Provider;
                if function.script_file.is_none() {
                    function.is_codeless = true;
                }
                function
            }));
            errors.extend(provider.function_errors());
        }

        let mut seen = HashSet::new();
        for function in &functions {
            if !function.is_anonymous() && !seen.insert(function.name.as_str()) {
                warn!("Duplicate function '{}' across metadata sources", function.name);
                return Err(MetadataError::DuplicateFunction {
                    name: function.name.clone(),
                });
            }
        }

        functions.retain(|function| {
            if is_script_file_determined(function, effective.http_worker) {
                return true;
            }
            add_function_error(&mut errors, function.name.clone(), UNDETERMINED_SCRIPT_FILE_MESSAGE);
            false
        });

        if let Some(allowed) = &effective.functions {
            let allowed: HashSet<String> = allowed.iter().map(|n| n.to_ascii_lowercase()).collect();
            functions.retain(|f| allowed.contains(&f.name.to_ascii_lowercase()));
            errors.retain(|name, _| allowed.contains(&name.to_ascii_lowercase()));
        }

        functions.sort_by(|a, b| a.name.cmp(&b.name));

        for (name, messages) in &errors {
            for message in messages {
                self.diagnostics
                    .record_function(codes::FUNCTION_ERROR, DiagnosticLevel::Error, name, message);
            }
        }
        info!("{} functions loaded ({} with errors)", functions.len(), errors.len());

        let index = Arc::new(FunctionIndex { functions, errors });
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = index.clone();
        Ok(index)
    }

    /// The current function index.
    pub fn index(&self) -> Arc<FunctionIndex> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The current valid functions.
    pub fn functions(&self) -> Vec<FunctionMetadata> {
        self.index().functions.clone()
    }

    /// Errors of the last successful load.
    pub fn errors(&self) -> FunctionErrors {
        self.index().errors.clone()
    }

    /// Look up a function by name, case-insensitively.
    pub fn try_get_function_metadata(&self, name: &str) -> Option<FunctionMetadata> {
        self.index().get(name).cloned()
    }
}

fn is_script_file_determined(function: &FunctionMetadata, http_worker: bool) -> bool {
    function.script_file.is_some()
        || function.is_codeless
        || function.source == FunctionSource::Worker
        || http_worker
}

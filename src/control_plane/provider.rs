//! Metadata provider seams.
//!
//! [`FunctionMetadataProvider`] is the app's primary source (host scan,
//! optionally fronted by worker indexing). [`FunctionProvider`]s are
//! pluggable extra sources whose functions are merged in by the manager.

use crate::error::MetadataError;
use crate::function::metadata::{FunctionMetadata, FunctionSource};
use crate::runtime::environment::Environment;
use crate::worker::WorkerConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Validation errors per function name.
pub type FunctionErrors = HashMap<String, Vec<String>>;

/// Append `message` to the errors of `function`.
pub fn add_function_error(errors: &mut FunctionErrors, function: impl Into<String>, message: impl Into<String>) {
    errors.entry(function.into()).or_default().push(message.into());
}

/// Primary source of function metadata.
#[async_trait]
pub trait FunctionMetadataProvider: Send + Sync {
    /// Resolve the app's functions.
    async fn get_function_metadata(
        &self,
        worker_configs: &[WorkerConfig],
        environment: &dyn Environment,
        force_refresh: bool,
    ) -> Result<Vec<FunctionMetadata>, MetadataError>;

    /// Errors of the last resolution.
    fn function_errors(&self) -> FunctionErrors;
}

/// External source contributing additional functions.
#[async_trait]
pub trait FunctionProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Functions contributed by this provider.
    async fn get_function_metadata(&self) -> Result<Vec<FunctionMetadata>, MetadataError>;

    /// Errors of the contributed functions.
    fn function_errors(&self) -> FunctionErrors;
}

/// In-memory function provider.
///
/// Useful for tests, or for embedding hosts that register functions in code.
#[derive(Debug, Default)]
pub struct MemoryFunctionProvider {
    name: String,
    functions: RwLock<Vec<FunctionMetadata>>,
    errors: RwLock<FunctionErrors>,
}

impl MemoryFunctionProvider {
    /// Create an empty provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a function.
    pub fn with_function(self, function: FunctionMetadata) -> Self {
        self.register(function);
        self
    }

    /// Register a function, replacing one with the same name.
    pub fn register(&self, function: FunctionMetadata) {
        let mut functions = self.functions.write().unwrap_or_else(|e| e.into_inner());
        functions.retain(|f| f.name != function.name);
        functions.push(function.with_source(FunctionSource::Provider));
    }

    /// Remove a function by name.
    pub fn remove(&self, name: &str) -> bool {
        let mut functions = self.functions.write().unwrap_or_else(|e| e.into_inner());
        let before = functions.len();
        functions.retain(|f| f.name != name);
        functions.len() != before
    }

    /// Record an error for `function`.
    pub fn add_error(&self, function: impl Into<String>, message: impl Into<String>) {
        let mut errors = self.errors.write().unwrap_or_else(|e| e.into_inner());
        add_function_error(&mut errors, function, message);
    }
}

#[async_trait]
impl FunctionProvider for MemoryFunctionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_function_metadata(&self) -> Result<Vec<FunctionMetadata>, MetadataError> {
        let functions = self.functions.read().unwrap_or_else(|e| e.into_inner());
        Ok(functions.clone())
    }

    fn function_errors(&self) -> FunctionErrors {
        self.errors.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

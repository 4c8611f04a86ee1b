//! Execution engine seam and the default script host.

use crate::control_plane::{FunctionIndex, FunctionMetadataManager};
use crate::error::HostError;
use crate::function::metadata::FunctionMetadata;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// One running instance of the function execution engine.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Instance identifier, unique per builder.
    fn instance_id(&self) -> u64;

    /// Functions served by this instance.
    fn functions(&self) -> &[FunctionMetadata];

    /// Start serving.
    async fn start(&self) -> Result<(), HostError>;

    /// Stop serving and release resources.
    async fn stop(&self) -> Result<(), HostError>;
}

/// Builds fresh engine instances from freshly loaded metadata.
#[async_trait]
pub trait EngineBuilder: Send + Sync {
    /// Build a new, not yet started, engine.
    async fn build(&self) -> Result<Arc<dyn ExecutionEngine>, HostError>;
}

/// Default engine: serves an immutable metadata snapshot.
pub struct ScriptHost {
    id: u64,
    index: Arc<FunctionIndex>,
    running: AtomicBool,
}

impl ScriptHost {
    /// Create a host for `index`.
    pub fn new(id: u64, index: Arc<FunctionIndex>) -> Self {
        Self {
            id,
            index,
            running: AtomicBool::new(false),
        }
    }

    /// The metadata snapshot this host was built from.
    pub fn index(&self) -> &FunctionIndex {
        &self.index
    }

    /// Look a served function up by name, case-insensitively.
    pub fn function(&self, name: &str) -> Option<&FunctionMetadata> {
        self.index.get(name)
    }

    /// Whether the host has been started and not stopped since.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ExecutionEngine for ScriptHost {
    fn instance_id(&self) -> u64 {
        self.id
    }

    fn functions(&self) -> &[FunctionMetadata] {
        &self.index.functions
    }

    async fn start(&self) -> Result<(), HostError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(HostError::Start(format!("script host {} is already running", self.id)));
        }

        let mut languages: BTreeMap<&str, usize> = BTreeMap::new();
        for function in &self.index.functions {
            *languages
                .entry(function.language.as_deref().unwrap_or("none"))
                .or_default() += 1;
        }
        info!(
            "Script host {} started with {} functions {:?}",
            self.id,
            self.index.len(),
            languages
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), HostError> {
        if self.running.swap(false, Ordering::AcqRel) {
            info!("Script host {} stopped", self.id);
        }
        Ok(())
    }
}

/// Builds [`ScriptHost`]s from a [`FunctionMetadataManager`].
pub struct ScriptHostBuilder {
    manager: Arc<FunctionMetadataManager>,
    next_id: AtomicU64,
}

impl ScriptHostBuilder {
    /// Create a builder reloading metadata through `manager`.
    pub fn new(manager: Arc<FunctionMetadataManager>) -> Self {
        Self {
            manager,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl EngineBuilder for ScriptHostBuilder {
    async fn build(&self) -> Result<Arc<dyn ExecutionEngine>, HostError> {
        let index = self.manager.load_function_metadata(true).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(ScriptHost::new(id, index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::MemoryFunctionProvider;
    use crate::diagnostics::Diagnostics;
    use crate::runtime::config::HostConfig;
    use crate::runtime::environment::MemoryEnvironment;

    #[tokio::test]
    async fn test_script_host_start_stop() {
        let index = Arc::new(FunctionIndex {
            functions: vec![FunctionMetadata::new("a"), FunctionMetadata::new("b")],
            errors: Default::default(),
        });
        let host = ScriptHost::new(7, index);
        assert_eq!(host.instance_id(), 7);
        assert_eq!(host.functions().len(), 2);

        assert_eq!(host.function("B").map(|f| f.name.as_str()), Some("b"));
        assert!(!host.is_running());

        host.start().await.unwrap();
        assert!(host.is_running());
        assert!(matches!(host.start().await, Err(HostError::Start(_))));

        host.stop().await.unwrap();
        assert!(!host.is_running());
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_builder_reloads_metadata() {
        let root = tempfile::tempdir().unwrap();
        let host_provider = Arc::new(crate::control_plane::HostFunctionMetadataProvider::new(root.path()));
        let manager = Arc::new(FunctionMetadataManager::new(
            host_provider,
            Arc::new(MemoryEnvironment::new()),
            Arc::new(Diagnostics::default()),
            &HostConfig::new(),
        ));
        let builder = ScriptHostBuilder::new(manager.clone());

        let first = builder.build().await.unwrap();
        assert!(first.functions().is_empty());

        manager.set_function_providers(vec![Arc::new(
            MemoryFunctionProvider::new("memory").with_function(FunctionMetadata::new("added")),
        )]);
        let second = builder.build().await.unwrap();
        assert_eq!(second.functions()[0].name, "added");
        assert_ne!(first.instance_id(), second.instance_id());
    }
}

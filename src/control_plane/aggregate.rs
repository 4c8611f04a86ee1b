//! Worker-or-host metadata aggregation.
//!
//! ```text
//!                 ┌── worker indexing enabled? ──┐
//!                 │ no                       yes │
//!                 ▼                              ▼
//!           host scan                 dispatcher.initialize(known)
//!                                     dispatcher.get_worker_metadata()
//!                                                │
//!                      ┌───────────┬─────────────┼──────────────────┐
//!                      ▼           ▼             ▼                  ▼
//!                failed/timeout  zero      use_default(names)   worker-indexed
//!                      └─── host scan (whole app) ┘   │              │
//!                                  host scan (those names)           │
//!                                                     └── mixed? ────┘
//! ```

use crate::control_plane::provider::{add_function_error, FunctionErrors, FunctionMetadataProvider};
use crate::diagnostics::{
    codes, DiagnosticLevel, Diagnostics, MIXED_FUNCTION_APP_MESSAGE, WORKER_INDEXING_FALLBACK_MESSAGE,
};
use crate::error::{MetadataError, ValidationError};
use crate::function::metadata::{FunctionMetadata, FunctionSource, RawFunctionMetadata};
use crate::function::validation::{validate_bindings, validate_function_name, validate_retry_options};
use crate::runtime::config::HostConfig;
use crate::runtime::environment::{
    is_feature_enabled, worker_runtime, Environment, FEATURE_ENABLE_WORKER_INDEXING,
};
use crate::worker::{InvocationDispatcher, WorkerConfig};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Primary metadata provider choosing between worker and host indexing.
pub struct AggregateFunctionMetadataProvider {
    host_provider: Arc<dyn FunctionMetadataProvider>,
    dispatcher: Option<Arc<dyn InvocationDispatcher>>,
    diagnostics: Arc<Diagnostics>,
    worker_timeout: Duration,
    mixed_app_cooldown: Duration,
    known_functions: tokio::sync::Mutex<Vec<FunctionMetadata>>,
    errors: Mutex<FunctionErrors>,
    mixed_app_warning_scheduled: Arc<AtomicBool>,
}

impl AggregateFunctionMetadataProvider {
    /// Create an aggregator over `host_provider`.
    pub fn new(
        host_provider: Arc<dyn FunctionMetadataProvider>,
        diagnostics: Arc<Diagnostics>,
        config: &HostConfig,
    ) -> Self {
        Self {
            host_provider,
            dispatcher: None,
            diagnostics,
            worker_timeout: config.worker_metadata_timeout_duration(),
            mixed_app_cooldown: config.mixed_app_cooldown_duration(),
            known_functions: tokio::sync::Mutex::new(Vec::new()),
            errors: Mutex::new(FunctionErrors::new()),
            mixed_app_warning_scheduled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach the worker invocation dispatcher.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn InvocationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    fn indexing_worker<'a>(
        &self,
        worker_configs: &'a [WorkerConfig],
        environment: &dyn Environment,
    ) -> Option<&'a WorkerConfig> {
        self.dispatcher.as_ref()?;
        if !is_feature_enabled(environment, FEATURE_ENABLE_WORKER_INDEXING) {
            return None;
        }

        let runtime = worker_runtime(environment);
        worker_configs.iter().filter(|c| c.worker_indexing).find(|c| {
            runtime
                .as_deref()
                .map_or(true, |rt| c.language.eq_ignore_ascii_case(rt))
        })
    }

    async fn index_with_worker(
        &self,
        dispatcher: &Arc<dyn InvocationDispatcher>,
        worker: &WorkerConfig,
        worker_configs: &[WorkerConfig],
        environment: &dyn Environment,
        force_refresh: bool,
        errors: &mut FunctionErrors,
    ) -> Result<Vec<FunctionMetadata>, MetadataError> {
        info!("Indexing functions with the '{}' worker", worker.language);
        let known = self.known_functions.lock().await.clone();

        let reported = match tokio::time::timeout(self.worker_timeout, async {
            dispatcher.initialize(&known).await?;
            dispatcher.get_worker_metadata().await
        })
        .await
        {
            Ok(Ok(raw)) => Some(raw),
            Ok(Err(e)) => {
                self.diagnostics.record(
                    codes::WORKER_INDEXING_FAILED,
                    DiagnosticLevel::Warning,
                    format!("Worker indexing failed: {}", e),
                );
                None
            }
            Err(_) => {
                self.diagnostics.record(
                    codes::WORKER_INDEXING_FAILED,
                    DiagnosticLevel::Warning,
                    format!("Worker indexing timed out after {:?}", self.worker_timeout),
                );
                None
            }
        };

        let mut functions = Vec::new();
        let mut deferred: Vec<String> = Vec::new();
        let fallback_all = match reported {
            None => true,
            Some(raw) if raw.is_empty() => true,
            Some(raw) => {
                for raw in raw {
                    if raw.use_default_metadata_indexing {
                        deferred.push(raw.name);
                        continue;
                    }
                    let name = raw.name.clone();
                    match resolve_worker_function(raw, worker) {
                        Ok(function) => functions.push(function),
                        Err(e) => add_function_error(errors, name, e.to_string()),
                    }
                }
                false
            }
        };
        let worker_resolved = functions.len();

        if fallback_all || !deferred.is_empty() {
            self.diagnostics.record(
                codes::WORKER_INDEXING_FALLBACK,
                DiagnosticLevel::Info,
                WORKER_INDEXING_FALLBACK_MESSAGE,
            );

            let scanned = self
                .host_provider
                .get_function_metadata(worker_configs, environment, force_refresh)
                .await?;
            let scan_errors = self.host_provider.function_errors();

            if fallback_all {
                functions.extend(scanned);
                errors.extend(scan_errors);
            } else {
                let wanted: HashSet<String> =
                    deferred.iter().map(|n| n.to_ascii_lowercase()).collect();
                functions.extend(
                    scanned
                        .into_iter()
                        .filter(|f| wanted.contains(&f.name.to_ascii_lowercase())),
                );
                errors.extend(
                    scan_errors
                        .into_iter()
                        .filter(|(name, _)| wanted.contains(&name.to_ascii_lowercase())),
                );
            }
        }

        let host_resolved = functions.len() - worker_resolved;
        if worker_resolved > 0 && host_resolved > 0 {
            self.schedule_mixed_app_warning();
        }

        match tokio::time::timeout(self.worker_timeout, dispatcher.finish_initialization(&functions)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Worker failed to finish initialization: {}", e),
            Err(_) => warn!("Worker finish_initialization timed out after {:?}", self.worker_timeout),
        }

        Ok(functions)
    }

    fn schedule_mixed_app_warning(&self) {
        if self
            .mixed_app_warning_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Mixed app warning already scheduled");
            return;
        }

        let diagnostics = self.diagnostics.clone();
        let cooldown = self.mixed_app_cooldown;
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            diagnostics.record(
                codes::MIXED_FUNCTION_APP,
                DiagnosticLevel::Warning,
                MIXED_FUNCTION_APP_MESSAGE,
            );
        });
    }
}

#[async_trait]
impl FunctionMetadataProvider for AggregateFunctionMetadataProvider {
    async fn get_function_metadata(
        &self,
        worker_configs: &[WorkerConfig],
        environment: &dyn Environment,
        force_refresh: bool,
    ) -> Result<Vec<FunctionMetadata>, MetadataError> {
        let mut errors = FunctionErrors::new();

        let functions = match (self.dispatcher.as_ref(), self.indexing_worker(worker_configs, environment)) {
            (Some(dispatcher), Some(worker)) => {
                self.index_with_worker(
                    dispatcher,
                    worker,
                    worker_configs,
                    environment,
                    force_refresh,
                    &mut errors,
                )
                .await?
            }
            _ => {
                let functions = self
                    .host_provider
                    .get_function_metadata(worker_configs, environment, force_refresh)
                    .await?;
                errors = self.host_provider.function_errors();
                functions
            }
        };

        *self.known_functions.lock().await = functions.clone();
        *self.errors.lock().unwrap_or_else(|e| e.into_inner()) = errors;
        Ok(functions)
    }

    fn function_errors(&self) -> FunctionErrors {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Validate a worker-reported function.
pub fn resolve_worker_function(
    raw: RawFunctionMetadata,
    worker: &WorkerConfig,
) -> Result<FunctionMetadata, ValidationError> {
    validate_function_name(&raw.name)?;
    let bindings = validate_bindings(&raw.bindings, &raw.name)?;
    validate_retry_options(raw.retry.as_ref())?;

    Ok(FunctionMetadata {
        name: raw.name,
        directory: raw.directory,
        script_file: raw.script_file,
        entry_point: raw.entry_point,
        language: raw.language.or_else(|| Some(worker.language.clone())),
        bindings,
        retry: raw.retry,
        is_codeless: false,
        source: FunctionSource::Worker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::metadata::{BindingDirection, BindingMetadata};
    use crate::runtime::environment::{MemoryEnvironment, FEATURE_FLAGS, WORKER_RUNTIME};
    use std::sync::atomic::AtomicUsize;

    const TRIGGER: &str = r#"{"type":"httpTrigger","name":"req","direction":"in"}"#;

    struct StaticHostProvider {
        functions: Vec<FunctionMetadata>,
        errors: FunctionErrors,
        calls: AtomicUsize,
    }

    impl StaticHostProvider {
        fn new(names: &[&str]) -> Self {
            Self {
                functions: names
                    .iter()
                    .map(|n| {
                        FunctionMetadata::new(*n)
                            .with_script_file(format!("/app/{}/index.js", n))
                            .with_binding(BindingMetadata::new("req", "httpTrigger", BindingDirection::In))
                    })
                    .collect(),
                errors: FunctionErrors::new(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FunctionMetadataProvider for StaticHostProvider {
        async fn get_function_metadata(
            &self,
            _worker_configs: &[WorkerConfig],
            _environment: &dyn Environment,
            _force_refresh: bool,
        ) -> Result<Vec<FunctionMetadata>, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.functions.clone())
        }

        fn function_errors(&self) -> FunctionErrors {
            self.errors.clone()
        }
    }

    #[derive(Default)]
    struct FakeDispatcher {
        reported: Vec<RawFunctionMetadata>,
        fail: bool,
        hang: bool,
        initialized_with: Mutex<Vec<usize>>,
        finished_with: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl InvocationDispatcher for FakeDispatcher {
        async fn initialize(&self, functions: &[FunctionMetadata]) -> Result<(), MetadataError> {
            self.initialized_with.lock().unwrap().push(functions.len());
            Ok(())
        }

        async fn get_worker_metadata(&self) -> Result<Vec<RawFunctionMetadata>, MetadataError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail {
                return Err(MetadataError::Dispatcher("worker crashed".into()));
            }
            Ok(self.reported.clone())
        }

        async fn finish_initialization(&self, functions: &[FunctionMetadata]) -> Result<(), MetadataError> {
            self.finished_with.lock().unwrap().push(functions.len());
            Ok(())
        }
    }

    fn worker_env() -> MemoryEnvironment {
        MemoryEnvironment::new()
            .with(FEATURE_FLAGS, FEATURE_ENABLE_WORKER_INDEXING)
            .with(WORKER_RUNTIME, "node")
    }

    fn workers() -> Vec<WorkerConfig> {
        vec![WorkerConfig::new("node", [".js"]).with_worker_indexing(true)]
    }

    fn aggregator(
        host: Arc<StaticHostProvider>,
        dispatcher: Arc<FakeDispatcher>,
        diagnostics: Arc<Diagnostics>,
    ) -> AggregateFunctionMetadataProvider {
        let config = HostConfig::new().worker_metadata_timeout(Duration::from_secs(5));
        AggregateFunctionMetadataProvider::new(host, diagnostics, &config).with_dispatcher(dispatcher)
    }

    fn names(functions: &[FunctionMetadata]) -> Vec<&str> {
        functions.iter().map(|f| f.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_host_indexing_without_feature_flag() {
        let host = Arc::new(StaticHostProvider::new(&["a", "b"]));
        let dispatcher = Arc::new(FakeDispatcher::default());
        let provider = aggregator(host.clone(), dispatcher.clone(), Arc::new(Diagnostics::default()));

        let functions = provider
            .get_function_metadata(&workers(), &MemoryEnvironment::new(), false)
            .await
            .unwrap();
        assert_eq!(names(&functions), vec!["a", "b"]);
        assert!(dispatcher.initialized_with.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_indexed_functions() {
        let host = Arc::new(StaticHostProvider::new(&["a"]));
        let dispatcher = Arc::new(FakeDispatcher {
            reported: vec![RawFunctionMetadata::new("w1")
                .with_binding(TRIGGER)
                .with_script_file("/app/dist/index.js")],
            ..FakeDispatcher::default()
        });
        let diagnostics = Arc::new(Diagnostics::default());
        let provider = aggregator(host.clone(), dispatcher.clone(), diagnostics.clone());

        let functions = provider.get_function_metadata(&workers(), &worker_env(), false).await.unwrap();
        assert_eq!(names(&functions), vec!["w1"]);
        assert_eq!(functions[0].source, FunctionSource::Worker);
        assert_eq!(functions[0].language.as_deref(), Some("node"));
        assert_eq!(host.calls.load(Ordering::SeqCst), 0);
        assert_eq!(diagnostics.count(codes::WORKER_INDEXING_FALLBACK), 0);
        assert_eq!(*dispatcher.finished_with.lock().unwrap(), vec![1]);

        provider.get_function_metadata(&workers(), &worker_env(), true).await.unwrap();
        assert_eq!(*dispatcher.initialized_with.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_zero_report_falls_back_to_host() {
        let host = Arc::new(StaticHostProvider::new(&["a", "b"]));
        let dispatcher = Arc::new(FakeDispatcher::default());
        let diagnostics = Arc::new(Diagnostics::default());
        let provider = aggregator(host.clone(), dispatcher, diagnostics.clone());

        let functions = provider.get_function_metadata(&workers(), &worker_env(), false).await.unwrap();
        assert_eq!(functions, host.functions);
        let fallback: Vec<_> = diagnostics
            .events()
            .into_iter()
            .filter(|e| e.code == codes::WORKER_INDEXING_FALLBACK)
            .collect();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].message, "Fallback to host indexing as worker denied indexing");
    }

    #[tokio::test]
    async fn test_worker_failure_falls_back_to_host() {
        let host = Arc::new(StaticHostProvider::new(&["a"]));
        let dispatcher = Arc::new(FakeDispatcher {
            fail: true,
            ..FakeDispatcher::default()
        });
        let diagnostics = Arc::new(Diagnostics::default());
        let provider = aggregator(host, dispatcher, diagnostics.clone());

        let functions = provider.get_function_metadata(&workers(), &worker_env(), false).await.unwrap();
        assert_eq!(names(&functions), vec!["a"]);
        assert_eq!(diagnostics.count(codes::WORKER_INDEXING_FAILED), 1);
        assert_eq!(diagnostics.count(codes::WORKER_INDEXING_FALLBACK), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_timeout_falls_back_to_host() {
        let host = Arc::new(StaticHostProvider::new(&["a"]));
        let dispatcher = Arc::new(FakeDispatcher {
            hang: true,
            ..FakeDispatcher::default()
        });
        let diagnostics = Arc::new(Diagnostics::default());
        let provider = aggregator(host, dispatcher, diagnostics.clone());

        let functions = provider.get_function_metadata(&workers(), &worker_env(), false).await.unwrap();
        assert_eq!(names(&functions), vec!["a"]);
        assert_eq!(diagnostics.count(codes::WORKER_INDEXING_FAILED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_app_warning_after_cooldown() {
        let host = Arc::new(StaticHostProvider::new(&["hostFn", "other"]));
        let dispatcher = Arc::new(FakeDispatcher {
            reported: vec![
                RawFunctionMetadata::new("workerFn").with_binding(TRIGGER),
                RawFunctionMetadata::use_default("HOSTFN"),
            ],
            ..FakeDispatcher::default()
        });
        let diagnostics = Arc::new(Diagnostics::default());
        let provider = aggregator(host, dispatcher, diagnostics.clone());

        let functions = provider.get_function_metadata(&workers(), &worker_env(), false).await.unwrap();
        assert_eq!(names(&functions), vec!["workerFn", "hostFn"]);
        assert_eq!(diagnostics.count(codes::WORKER_INDEXING_FALLBACK), 1);
        assert_eq!(diagnostics.count(codes::MIXED_FUNCTION_APP), 0);

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(diagnostics.count(codes::MIXED_FUNCTION_APP), 1);

        provider.get_function_metadata(&workers(), &worker_env(), false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(diagnostics.count(codes::MIXED_FUNCTION_APP), 1);
    }

    #[tokio::test]
    async fn test_invalid_worker_function_is_excluded() {
        let host = Arc::new(StaticHostProvider::new(&[]));
        let dispatcher = Arc::new(FakeDispatcher {
            reported: vec![
                RawFunctionMetadata::new("good").with_binding(TRIGGER),
                RawFunctionMetadata::new("bad"),
            ],
            ..FakeDispatcher::default()
        });
        let provider = aggregator(host, dispatcher, Arc::new(Diagnostics::default()));

        let functions = provider.get_function_metadata(&workers(), &worker_env(), false).await.unwrap();
        assert_eq!(names(&functions), vec!["good"]);
        assert_eq!(
            provider.function_errors()["bad"],
            vec!["At least one binding must be declared."]
        );
    }

    #[tokio::test]
    async fn test_duplicate_between_worker_and_host() {
        let host = Arc::new(StaticHostProvider::new(&["dup"]));
        let dispatcher = Arc::new(FakeDispatcher {
            reported: vec![
                RawFunctionMetadata::new("dup").with_binding(TRIGGER),
                RawFunctionMetadata::use_default("dup"),
            ],
            ..FakeDispatcher::default()
        });
        let provider = aggregator(host, dispatcher, Arc::new(Diagnostics::default()));

        // The manager rejects the duplicate; the aggregate reports both entries.
        let functions = provider.get_function_metadata(&workers(), &worker_env(), false).await.unwrap();
        assert_eq!(names(&functions), vec!["dup", "dup"]);
        assert_eq!(functions[0].source, FunctionSource::Worker);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_app_records_one_warning() {
        let host = Arc::new(StaticHostProvider::new(&["hostFn"]));
        let dispatcher = Arc::new(FakeDispatcher {
            reported: vec![
                RawFunctionMetadata::new("worker1").with_binding(TRIGGER),
                RawFunctionMetadata::new("worker2").with_binding(TRIGGER),
                RawFunctionMetadata::new("worker3").with_binding(TRIGGER),
                RawFunctionMetadata::use_default("hostFn"),
            ],
            ..FakeDispatcher::default()
        });
        let diagnostics = Arc::new(Diagnostics::default());
        let provider = aggregator(host, dispatcher, diagnostics.clone());

        let functions = provider.get_function_metadata(&workers(), &worker_env(), false).await.unwrap();
        assert_eq!(names(&functions), vec!["worker1", "worker2", "worker3", "hostFn"]);

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(diagnostics.count(codes::MIXED_FUNCTION_APP), 1);
    }

    #[tokio::test]
    async fn test_runtime_must_match_indexing_worker() {
        let host = Arc::new(StaticHostProvider::new(&["a"]));
        let dispatcher = Arc::new(FakeDispatcher::default());
        let provider = aggregator(host.clone(), dispatcher.clone(), Arc::new(Diagnostics::default()));

        let env = worker_env().with(WORKER_RUNTIME, "python");
        provider.get_function_metadata(&workers(), &env, false).await.unwrap();
        assert!(dispatcher.initialized_with.lock().unwrap().is_empty());
        assert_eq!(host.calls.load(Ordering::SeqCst), 1);
    }
}

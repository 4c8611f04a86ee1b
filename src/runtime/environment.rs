//! Environment variable access.

use std::collections::HashMap;
use std::sync::RwLock;

/// Variable naming the language worker runtime of the app.
pub const WORKER_RUNTIME: &str = "FEZZ_WORKER_RUNTIME";

/// Comma-separated list of enabled feature flags.
pub const FEATURE_FLAGS: &str = "FEZZ_FEATURE_FLAGS";

/// Feature flag enabling worker indexing.
pub const FEATURE_ENABLE_WORKER_INDEXING: &str = "EnableWorkerIndexing";

/// Source of environment variables.
pub trait Environment: Send + Sync {
    /// Get a variable, if set.
    fn get_variable(&self, name: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEnvironment;

impl Environment for SystemEnvironment {
    fn get_variable(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// In-memory environment, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    variables: RwLock<HashMap<String, String>>,
}

impl MemoryEnvironment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn with(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a variable.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.variables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), value.into());
    }

    /// Remove a variable.
    pub fn remove(&self, name: &str) {
        self.variables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }
}

impl Environment for MemoryEnvironment {
    fn get_variable(&self, name: &str) -> Option<String> {
        self.variables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }
}

/// The configured worker runtime, if non-empty.
pub fn worker_runtime(environment: &dyn Environment) -> Option<String> {
    environment
        .get_variable(WORKER_RUNTIME)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Whether `flag` appears in [`FEATURE_FLAGS`] (case-insensitive).
pub fn is_feature_enabled(environment: &dyn Environment, flag: &str) -> bool {
    environment
        .get_variable(FEATURE_FLAGS)
        .is_some_and(|flags| flags.split(',').any(|f| f.trim().eq_ignore_ascii_case(flag)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_flags() {
        let env = MemoryEnvironment::new().with(FEATURE_FLAGS, "Foo, enableworkerindexing ,Bar");
        assert!(is_feature_enabled(&env, FEATURE_ENABLE_WORKER_INDEXING));
        assert!(!is_feature_enabled(&env, "Baz"));

        env.remove(FEATURE_FLAGS);
        assert!(!is_feature_enabled(&env, FEATURE_ENABLE_WORKER_INDEXING));
    }

    #[test]
    fn test_worker_runtime() {
        let env = MemoryEnvironment::new();
        assert_eq!(worker_runtime(&env), None);
        env.set(WORKER_RUNTIME, "  ");
        assert_eq!(worker_runtime(&env), None);
        env.set(WORKER_RUNTIME, "node");
        assert_eq!(worker_runtime(&env).as_deref(), Some("node"));
    }
}

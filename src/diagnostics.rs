//! Structured diagnostic events.
//!
//! Validation failures, indexing fallbacks and mixed-app warnings are recorded
//! here. Every event is emitted through `tracing` and kept in a bounded buffer
//! so operators and tests can read back what happened during recent reloads.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Diagnostic codes.
pub mod codes {
    /// The worker declined indexing and the host scanned instead.
    pub const WORKER_INDEXING_FALLBACK: &str = "worker_indexing_fallback";
    /// The worker round trip failed or timed out.
    pub const WORKER_INDEXING_FAILED: &str = "worker_indexing_failed";
    /// Some functions came from the worker and some from the host.
    pub const MIXED_FUNCTION_APP: &str = "mixed_function_app";
    /// A function was excluded by validation.
    pub const FUNCTION_ERROR: &str = "function_error";
    /// An external function provider failed or timed out.
    pub const PROVIDER_ERROR: &str = "provider_error";
}

/// Message recorded when the host falls back to scanning.
pub const WORKER_INDEXING_FALLBACK_MESSAGE: &str =
    "Fallback to host indexing as worker denied indexing";

/// Message recorded after the mixed-app cool-down.
pub const MIXED_FUNCTION_APP_MESSAGE: &str =
    "Detected mixed function app. Some functions may not be indexed";

/// Default number of retained events.
pub const DEFAULT_CAPACITY: usize = 512;

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// Informational.
    Info,
    /// Something may need attention.
    Warning,
    /// Something was excluded or failed.
    Error,
}

/// A recorded diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEvent {
    /// Stable event code, see [`codes`].
    pub code: &'static str,
    /// Severity.
    pub level: DiagnosticLevel,
    /// Human-readable message.
    pub message: String,
    /// Function the event is about, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
}

/// Bounded recorder of diagnostic events.
#[derive(Debug)]
pub struct Diagnostics {
    events: Mutex<VecDeque<DiagnosticEvent>>,
    capacity: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Diagnostics {
    /// Create a recorder keeping at most `capacity` events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record an app-level event.
    pub fn record(&self, code: &'static str, level: DiagnosticLevel, message: impl Into<String>) {
        self.push(code, level, message.into(), None);
    }

    /// Record an event about one function.
    pub fn record_function(
        &self,
        code: &'static str,
        level: DiagnosticLevel,
        function: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.push(code, level, message.into(), Some(function.into()));
    }

    fn push(&self, code: &'static str, level: DiagnosticLevel, message: String, function: Option<String>) {
        let name = function.as_deref().unwrap_or_default();
        match level {
            DiagnosticLevel::Info => info!(code, function = name, "{}", message),
            DiagnosticLevel::Warning => warn!(code, function = name, "{}", message),
            DiagnosticLevel::Error => error!(code, function = name, "{}", message),
        }

        let event = DiagnosticEvent {
            code,
            level,
            message,
            function,
            timestamp: current_timestamp(),
        };

        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Snapshot of the retained events, oldest first.
    pub fn events(&self) -> Vec<DiagnosticEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.iter().cloned().collect()
    }

    /// Number of retained events with `code`.
    pub fn count(&self, code: &str) -> usize {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.iter().filter(|e| e.code == code).count()
    }

    /// Drop all retained events.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Get current timestamp in milliseconds.
fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

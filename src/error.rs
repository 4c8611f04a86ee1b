//! Error types for the host control plane.
//!
//! Three layers, matching how far a failure is allowed to travel:
//!
//! - [`ValidationError`]: one function is malformed. The function is excluded
//!   and the message lands in the errors map; the rest of the app keeps going.
//! - [`MetadataError`]: the reload as a whole cannot produce a consistent
//!   function set (duplicate names across sources, unreadable root, ...).
//! - [`HostError`]: the execution engine could not be built, started or stopped.
//!
//! All of them are `Clone` so the lifecycle can hand out `last_error()` snapshots.

use std::time::Duration;
use thiserror::Error;

/// Message used when a function declares no bindings at all.
pub const NO_BINDINGS_MESSAGE: &str = "At least one binding must be declared.";

/// Message used when a `scriptFile` hint points at a file that is not there.
pub const INVALID_SCRIPT_FILE_MESSAGE: &str = "Invalid script file name configuration. The 'scriptFile' property is set to a file that does not exist.";

/// Message used when no primary script could be determined for a function.
pub const UNDETERMINED_SCRIPT_FILE_MESSAGE: &str = "Unable to determine the primary function script. Make sure at least one script file is present. Try renaming your entry point script to 'run' or alternatively you can specify the name of the entry point script explicitly by adding a 'scriptFile' property to your function metadata.";

/// A single function failed validation.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The declaration is structurally wrong (no bindings, bad JSON, missing `type`).
    #[error("{0}")]
    Format(String),

    /// Two bindings of the same function share a name.
    #[error("Multiple bindings with name '{name}' discovered. Binding names must be unique.")]
    DuplicateName {
        /// The repeated binding name.
        name: String,
    },

    /// A binding name is empty or not an identifier.
    #[error("The binding name {name} is invalid. Please assign a valid name to the binding.")]
    InvalidBindingName {
        /// The rejected binding name.
        name: String,
    },

    /// A function name is reserved or not an identifier.
    #[error("'{name}' is not a valid function name.")]
    InvalidFunctionName {
        /// The rejected function name.
        name: String,
    },

    /// No binding type ends in `Trigger`.
    #[error("No trigger binding specified. A function must have a trigger input binding.")]
    MissingTrigger,

    /// More than one binding type ends in `Trigger`.
    #[error("Multiple trigger bindings specified. A function must have exactly one trigger binding.")]
    MultipleTriggers,

    /// A `$return` binding is not an output binding.
    #[error("$return bindings must specify a direction of 'out'.")]
    ReturnDirection,

    /// Script file resolution failed.
    #[error("{0}")]
    FunctionConfiguration(String),

    /// Retry options are inconsistent.
    #[error("{0}")]
    InvalidRetry(String),
}

impl ValidationError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ValidationError::Format(_) => "format",
            ValidationError::DuplicateName { .. } => "duplicate_binding_name",
            ValidationError::InvalidBindingName { .. } => "invalid_binding_name",
            ValidationError::InvalidFunctionName { .. } => "invalid_function_name",
            ValidationError::MissingTrigger => "missing_trigger",
            ValidationError::MultipleTriggers => "multiple_triggers",
            ValidationError::ReturnDirection => "return_direction",
            ValidationError::FunctionConfiguration(_) => "function_configuration",
            ValidationError::InvalidRetry(_) => "invalid_retry",
        }
    }
}

/// A metadata reload failed as a whole.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// Two sources produced a function with the same name.
    #[error("Found duplicate FunctionMetadata with the name {name}")]
    DuplicateFunction {
        /// The duplicated function name.
        name: String,
    },

    /// A file or directory could not be read.
    #[error("I/O error at '{path}': {message}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying error text.
        message: String,
    },

    /// A configuration document could not be parsed.
    #[error("invalid configuration in '{path}': {message}")]
    Config {
        /// Path of the document.
        path: String,
        /// Parser error text.
        message: String,
    },

    /// A collaborator did not answer in time.
    #[error("timed out after {timeout:?} waiting for {operation}")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// The worker invocation dispatcher reported a failure.
    #[error("worker dispatcher error: {0}")]
    Dispatcher(String),

    /// An external function provider reported a failure.
    #[error("function provider '{provider}' failed: {message}")]
    Provider {
        /// Provider name.
        provider: String,
        /// Error text.
        message: String,
    },

    /// A blocking scan task panicked or was cancelled.
    #[error("metadata scan aborted: {0}")]
    Aborted(String),
}

impl MetadataError {
    /// Build an [`MetadataError::Io`] from a path and an I/O error.
    pub fn io(path: impl AsRef<std::path::Path>, err: &std::io::Error) -> Self {
        MetadataError::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }
}

/// The execution engine lifecycle failed.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Metadata for the new engine could not be loaded.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The engine could not be constructed.
    #[error("failed to build host: {0}")]
    Build(String),

    /// The engine was built but did not start.
    #[error("failed to start host: {0}")]
    Start(String),

    /// The engine did not stop cleanly.
    #[error("failed to stop host: {0}")]
    Stop(String),
}

impl HostError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            HostError::Metadata(_) => "host_metadata",
            HostError::Build(_) => "host_build",
            HostError::Start(_) => "host_start",
            HostError::Stop(_) => "host_stop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        assert_eq!(
            ValidationError::DuplicateName { name: "dupe".into() }.to_string(),
            "Multiple bindings with name 'dupe' discovered. Binding names must be unique."
        );
        assert_eq!(
            ValidationError::ReturnDirection.to_string(),
            "$return bindings must specify a direction of 'out'."
        );
        assert_eq!(
            ValidationError::Format(NO_BINDINGS_MESSAGE.into()).to_string(),
            "At least one binding must be declared."
        );
    }

    #[test]
    fn test_host_error_from_metadata() {
        let err: HostError = MetadataError::DuplicateFunction { name: "dup".into() }.into();
        assert_eq!(err.as_label(), "host_metadata");
        assert_eq!(err.to_string(), "Found duplicate FunctionMetadata with the name dup");
    }
}

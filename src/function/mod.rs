//! Function metadata, validation and resolution.
//!
//! This module provides the per-function half of metadata resolution:
//! - Metadata types for functions and bindings
//! - Binding, name and retry validation
//! - Primary script file and language resolution

pub mod language;
pub mod metadata;
pub mod script;
pub mod validation;

pub use language::{parse_language, CSHARP_LANGUAGE, DOTNET_ASSEMBLY_LANGUAGE};
pub use metadata::{
    BindingDirection, BindingMetadata, FunctionMetadata, FunctionSource, RawFunctionMetadata,
    RetryOptions, RetryStrategy, RETURN_BINDING_NAME,
};
pub use script::{determine_primary_script_file, FUNCTION_CONFIG_FILE_NAME};
pub use validation::{
    validate_binding_name, validate_binding_values, validate_bindings, validate_function_name,
    validate_retry_options,
};

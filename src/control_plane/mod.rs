//! Control-plane module for function metadata sources.
//!
//! This module merges the app's function metadata from its sources:
//! - Host-side scanning of `function.json` declarations
//! - Worker self-reported metadata with host fallback
//! - Pluggable external function providers

pub mod aggregate;
pub mod host_provider;
pub mod manager;
pub mod provider;

pub use aggregate::AggregateFunctionMetadataProvider;
pub use host_provider::HostFunctionMetadataProvider;
pub use manager::{FunctionIndex, FunctionMetadataManager};
pub use provider::{
    add_function_error, FunctionErrors, FunctionMetadataProvider, FunctionProvider,
    MemoryFunctionProvider,
};

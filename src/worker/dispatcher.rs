//! Invocation dispatcher seam.
//!
//! The dispatcher owns the channel to the language worker processes. The
//! control plane only needs the indexing handshake: initialize the worker with
//! the functions it already knows, ask for the worker's own metadata, then
//! confirm the final set.

use crate::error::MetadataError;
use crate::function::metadata::{FunctionMetadata, RawFunctionMetadata};
use async_trait::async_trait;

/// Connection to a language worker, as seen by metadata indexing.
#[async_trait]
pub trait InvocationDispatcher: Send + Sync {
    /// Start or re-initialize the worker with the previously known functions.
    async fn initialize(&self, functions: &[FunctionMetadata]) -> Result<(), MetadataError>;

    /// Ask the worker for the functions it indexed itself.
    async fn get_worker_metadata(&self) -> Result<Vec<RawFunctionMetadata>, MetadataError>;

    /// Hand the resolved function set back to the worker.
    async fn finish_initialization(&self, functions: &[FunctionMetadata]) -> Result<(), MetadataError>;
}

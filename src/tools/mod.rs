//! Tool abstraction: capability records, handler trait, and the registry.

use async_trait::async_trait;

use crate::types::StepParams;

pub mod builtin;
pub mod registry;

pub use registry::{DependencyCheck, RegistryError, RegistryStats, ToolRegistry};

/// Errors returned by tool handlers.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The handler does not implement the requested method.
    #[error("method not supported: {0}")]
    MethodNotSupported(String),
    /// The parameters do not fit the requested method.
    #[error("invalid parameters for {method}: {reason}")]
    InvalidParams {
        /// The method that was called.
        method: String,
        /// Why the parameters were rejected.
        reason: String,
    },
    /// A policy gate refused the operation.
    #[error("operation denied: {0}")]
    Denied(String),
    /// The underlying operation failed.
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    /// Build a `Failed` error from any displayable cause.
    pub fn failed(cause: impl std::fmt::Display) -> Self {
        Self::Failed(cause.to_string())
    }
}

/// Executor function for one registered tool.
///
/// `method` is the route method chosen by the router; `params` is the
/// typed parameter set of the step being served.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Perform the operation and return its JSON output.
    async fn call(&self, method: &str, params: StepParams) -> Result<serde_json::Value, ToolError>;
}

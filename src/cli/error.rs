//! CLI error types and conversions

use crate::collector::CollectError;
use crate::registry::RegistryError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Registry error
    #[error("registry error: {0}")]
    RegistryError(#[from] RegistryError),

    /// Collection error
    #[error("{0}")]
    CollectError(#[from] CollectError),

    /// Resume error
    #[error("checkpoint error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Serialization of command output failed
    #[error("output error: {0}")]
    OutputError(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

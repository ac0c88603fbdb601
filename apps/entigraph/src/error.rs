//! # Application Errors
//!
//! Everything a command can fail with. Engine errors pass through unchanged.

use entigraph_core::GraphError;
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum AppError {
    /// Engine failure.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Unreadable or invalid configuration file.
    #[error("config error: {0}")]
    Config(String),

    /// File system failure outside the snapshot store.
    #[error("io error: {0}")]
    Io(String),

    /// No snapshot stored under this name.
    #[error("graph '{0}' not found, run `entigraph init` or `ingest` first")]
    MissingGraph(String),

    /// A snapshot of this name already exists.
    #[error("graph '{0}' already exists, use --force to overwrite")]
    GraphExists(String),

    /// Bad command line input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A background fetch task died.
    #[error("task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

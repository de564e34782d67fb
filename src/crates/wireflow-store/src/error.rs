//! Error types for store operations

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while persisting or loading workflow data
#[derive(Error, Debug)]
pub enum StoreError {
    /// Workflow not found
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Execution not found
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

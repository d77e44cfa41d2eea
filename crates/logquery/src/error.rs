//! Error types for a logquery Node.

use logquery_core::ValidationError;
use logquery_store::StoreError;
use logquery_sync::QueryError;
use thiserror::Error;

/// Errors that can occur during Node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Validation error.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Query or protocol error.
    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

/// Result type for Node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

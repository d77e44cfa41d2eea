//! Error types for the sync module.

use thiserror::Error;

use logquery_core::{LedgerError, RequestId};

use crate::messages::NodeId;

/// A peer broke the query protocol. Fatal to the affected query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A peer sent a second final response.
    #[error("peer {peer} finalized twice")]
    FinalizedTwice { peer: NodeId },

    /// A peer reported refs after its final response.
    #[error("peer {peer} sent an event after finalizing")]
    EventAfterFinal { peer: NodeId },

    /// A message referenced a query this node does not know.
    #[error("unknown request id: {0}")]
    UnknownRequest(RequestId),

    /// A message was routed to a query with a different id.
    #[error("request id mismatch: expected {expected}, got {got}")]
    RequestMismatch { expected: RequestId, got: RequestId },

    /// Ledger finalization was misused.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Errors that can occur while resolving a query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    /// A storage lookup or store call failed.
    #[error("storage error: {0}")]
    Storage(#[from] logquery_store::StoreError),

    /// Input rejected at ingestion.
    #[error("malformed input: {0}")]
    Malformed(#[from] logquery_core::ValidationError),

    /// Wire encoding or decoding failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] logquery_core::CoreError),

    /// Message exceeds protocol limits.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The query already reached its terminal state.
    #[error("query is closed")]
    Closed,

    /// A routed event found the query's mailbox full.
    #[error("query mailbox overflowed")]
    Overloaded,

    /// The query was cancelled.
    #[error("query cancelled")]
    Cancelled,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, QueryError>;

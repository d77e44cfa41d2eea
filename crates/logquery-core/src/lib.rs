//! # Logquery Core
//!
//! Pure primitives for reconciling a historical range query across nodes
//! that each hold a partial copy of a message log.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over ordered message identifiers.
//!
//! ## Key Types
//!
//! - [`MessageRef`] - `(timestamp, sequence_number)`, the total-order key of a message
//! - [`Record`] - A stored message: its full [`MessageId`] plus payload bytes
//! - [`QueryRequest`] / [`QueryOptions`] - One logical query and its bounds
//! - [`AggregationList`] - The readiness ledger driving what a query may emit
//! - [`PropagationList`] - The diff ledger driving what a requester is missing
//! - [`Chunker`] - Size-bounded batching of an item stream for the wire
//!
//! ## Ordering
//!
//! Every decision in the reconciliation engine is made against the
//! lexicographic order of [`MessageRef`]. Helpers [`min_ref`] and
//! [`max_ref`] treat a missing operand as absorbing, so watermarks can be
//! folded without special-casing "nothing reported yet".

pub mod aggregation;
pub mod chunker;
pub mod error;
pub mod propagation;
pub mod query;
pub mod record;
pub mod types;
pub mod validation;

pub use aggregation::AggregationList;
pub use chunker::{
    ChunkCallback, ChunkItem, Chunker, ChunkerConfig, DEFAULT_BYTES_LIMIT, DEFAULT_ITEMS_LIMIT,
};
pub use error::{CoreError, LedgerError, ValidationError};
pub use propagation::PropagationList;
pub use query::{QueryOptions, QueryRange, QueryRequest};
pub use record::{MessageId, Record};
pub use types::{
    compare_refs, max_ref, min_ref, MessageRef, RequestId, StreamId, MAX_SEQUENCE_NUMBER,
    MAX_TIMESTAMP, MIN_SEQUENCE_NUMBER, MIN_TIMESTAMP,
};
pub use validation::{
    validate_message_id, validate_record, validate_ref, validate_refs, validate_request,
};

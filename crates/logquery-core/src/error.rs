//! Error types for the Logquery Core.

use thiserror::Error;

use crate::types::{MessageRef, StreamId};

/// Core errors raised while encoding or decoding wire values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Rejections of malformed input, raised before anything touches a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("stream id must not be empty")]
    EmptyStreamId,

    #[error("request id must not be empty")]
    EmptyRequestId,

    #[error("sequence number {0} exceeds the maximum of 2147483647")]
    SequenceNumberOutOfRange(u32),

    #[error("timestamp {0} is negative")]
    NegativeTimestamp(i64),

    #[error("range is inverted: from {from} is after to {to}")]
    InvertedRange { from: MessageRef, to: MessageRef },

    #[error("ref {0} lies outside the requested range")]
    RefOutOfRange(MessageRef),

    #[error("record belongs to {got_stream}/{got_partition}, query targets {expected_stream}/{expected_partition}")]
    WrongStreamPartition {
        expected_stream: StreamId,
        expected_partition: u32,
        got_stream: StreamId,
        got_partition: u32,
    },
}

/// Misuse of a ledger's one-shot finalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("requester side is already finalized")]
    RequesterFinalized,

    #[error("local side is already finalized")]
    LocalFinalized,
}

//! Peer protocol message types.
//!
//! These messages are exchanged between nodes to resolve one query
//! across every node that holds part of its answer.

use std::fmt;

use serde::{Deserialize, Serialize};

use logquery_core::{CoreError, MessageRef, QueryRequest, Record, RequestId};

/// Unique identifier for a node in the network.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random node ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }

    /// Short hex form for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// Message size limits.
pub mod limits {
    /// Max refs in QueryResponse.refs.
    pub const MAX_REFS_PER_RESPONSE: usize = 5000;
    /// Max records in QueryPropagate.payload.
    pub const MAX_RECORDS_PER_PROPAGATE: usize = 5000;
}

/// Existence report: refs the sender holds for a query. No payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub request_id: RequestId,
    /// Ascending.
    pub refs: Vec<MessageRef>,
    /// The sender will report nothing more for this query.
    pub is_final: bool,
}

impl QueryResponse {
    pub fn new(request_id: RequestId, refs: Vec<MessageRef>, is_final: bool) -> Self {
        Self {
            request_id,
            refs,
            is_final,
        }
    }
}

/// Payload delivery of records the receiver is missing.
///
/// Carries no finality flag; finality follows the sender's response stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPropagate {
    pub request_id: RequestId,
    pub payload: Vec<Record>,
}

/// Wire discriminant of a [`SystemMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    QueryRequest = 1,
    QueryResponse = 2,
    QueryPropagate = 3,
}

/// Every message exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemMessage {
    /// Ask a peer to serve a query.
    QueryRequest(QueryRequest),
    /// Report refs held for a query.
    QueryResponse(QueryResponse),
    /// Deliver records a peer is missing.
    QueryPropagate(QueryPropagate),
}

impl SystemMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            SystemMessage::QueryRequest(_) => MessageType::QueryRequest,
            SystemMessage::QueryResponse(_) => MessageType::QueryResponse,
            SystemMessage::QueryPropagate(_) => MessageType::QueryPropagate,
        }
    }

    /// The query this message belongs to.
    pub fn request_id(&self) -> &RequestId {
        match self {
            SystemMessage::QueryRequest(m) => &m.request_id,
            SystemMessage::QueryResponse(m) => &m.request_id,
            SystemMessage::QueryPropagate(m) => &m.request_id,
        }
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        match self {
            SystemMessage::QueryRequest(_) => {}
            SystemMessage::QueryResponse(response) => {
                if response.refs.len() > limits::MAX_REFS_PER_RESPONSE {
                    return Err("too many refs in response");
                }
            }
            SystemMessage::QueryPropagate(propagate) => {
                if propagate.payload.len() > limits::MAX_RECORDS_PER_PROPAGATE {
                    return Err("too many records in propagate");
                }
            }
        }
        Ok(())
    }

    /// Encode as CBOR.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from CBOR.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

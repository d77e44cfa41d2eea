//! Strong type definitions for logquery.
//!
//! Identifiers are newtypes to prevent mixing a stream id with a request id
//! at compile time.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Smallest sequence number a message can carry.
pub const MIN_SEQUENCE_NUMBER: u32 = 0;

/// Largest sequence number a message can carry.
pub const MAX_SEQUENCE_NUMBER: u32 = 2_147_483_647;

/// Smallest timestamp a message can carry (Unix ms).
pub const MIN_TIMESTAMP: i64 = 0;

/// Largest timestamp a query bound can carry (Unix ms).
pub const MAX_TIMESTAMP: i64 = i64::MAX;

/// The total-order key of a message: `(timestamp, sequence_number)`.
///
/// Ordered lexicographically, timestamp first. Equality is by value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    /// Publisher-assigned timestamp (Unix ms).
    pub timestamp: i64,
    /// Tie-breaker within one timestamp.
    pub sequence_number: u32,
}

impl MessageRef {
    /// The lowest possible ref, used as an open lower bound.
    pub const MIN: Self = Self {
        timestamp: MIN_TIMESTAMP,
        sequence_number: MIN_SEQUENCE_NUMBER,
    };

    /// The highest possible ref, used as an open upper bound.
    pub const MAX: Self = Self {
        timestamp: MAX_TIMESTAMP,
        sequence_number: MAX_SEQUENCE_NUMBER,
    };

    /// Create a ref from its parts.
    pub const fn new(timestamp: i64, sequence_number: u32) -> Self {
        Self {
            timestamp,
            sequence_number,
        }
    }
}

impl fmt::Debug for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageRef({}:{})", self.timestamp, self.sequence_number)
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.timestamp, self.sequence_number)
    }
}

impl From<(i64, u32)> for MessageRef {
    fn from((timestamp, sequence_number): (i64, u32)) -> Self {
        Self::new(timestamp, sequence_number)
    }
}

/// Three-way comparison of two refs.
pub fn compare_refs(a: &MessageRef, b: &MessageRef) -> Ordering {
    a.cmp(b)
}

/// The smaller of two optional refs. A missing operand is absorbing:
/// `min_ref(None, Some(b)) == Some(b)`.
pub fn min_ref(a: Option<MessageRef>, b: Option<MessageRef>) -> Option<MessageRef> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// The larger of two optional refs. A missing operand is absorbing:
/// `max_ref(None, Some(b)) == Some(b)`.
pub fn max_ref(a: Option<MessageRef>, b: Option<MessageRef>) -> Option<MessageRef> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Identifier of a message stream.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub String);

impl StreamId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of one query, shared by the requester and every peer serving it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random request id (16 random bytes, hex encoded).
    pub fn random() -> Self {
        use rand::Rng;
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

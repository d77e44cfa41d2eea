//! Stored messages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{MessageRef, StreamId};

/// Full identifier of a message.
///
/// Two records with the same `MessageId` are assumed to carry identical
/// payloads wherever they exist.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub stream_id: StreamId,
    pub partition: u32,
    pub timestamp: i64,
    pub sequence_number: u32,
    pub publisher_id: String,
    pub msg_chain_id: String,
}

impl MessageId {
    /// The order key of this message.
    pub fn message_ref(&self) -> MessageRef {
        MessageRef::new(self.timestamp, self.sequence_number)
    }
}

/// A message as held by storage: identifier plus opaque payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: MessageId,
    pub payload: Bytes,
}

impl Record {
    pub fn new(id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// The order key of this record.
    pub fn message_ref(&self) -> MessageRef {
        self.id.message_ref()
    }

    /// Approximate wire size, used by the chunker.
    pub fn byte_size(&self) -> usize {
        self.payload.len()
            + self.id.stream_id.as_str().len()
            + self.id.publisher_id.len()
            + self.id.msg_chain_id.len()
            + std::mem::size_of::<u32>() * 2
            + std::mem::size_of::<i64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(ts: i64, seq: u32) -> MessageId {
        MessageId {
            stream_id: StreamId::new("stream"),
            partition: 0,
            timestamp: ts,
            sequence_number: seq,
            publisher_id: "pub".into(),
            msg_chain_id: "chain".into(),
        }
    }

    #[test]
    fn test_record_ref() {
        let record = Record::new(id(10, 3), Bytes::from_static(b"hello"));
        assert_eq!(record.message_ref(), MessageRef::new(10, 3));
    }

    #[test]
    fn test_byte_size_grows_with_payload() {
        let small = Record::new(id(1, 0), Bytes::from_static(b"a"));
        let large = Record::new(id(1, 0), vec![0u8; 1024]);
        assert_eq!(large.byte_size() - small.byte_size(), 1023);
    }
}

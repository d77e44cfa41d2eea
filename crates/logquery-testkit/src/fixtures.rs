//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use bytes::Bytes;
use logquery_core::{
    MessageId, MessageRef, QueryOptions, QueryRequest, Record, RequestId, StreamId,
};
use logquery_store::{MemoryStore, StoreError};

/// One stream partition and publisher that records and requests are built for.
#[derive(Debug, Clone)]
pub struct TestFixture {
    pub stream_id: StreamId,
    pub partition: u32,
    pub publisher_id: String,
    pub msg_chain_id: String,
}

impl TestFixture {
    /// A fixture for `test-stream`, partition 0.
    pub fn new() -> Self {
        Self::with_stream("test-stream", 0)
    }

    pub fn with_stream(stream: &str, partition: u32) -> Self {
        Self {
            stream_id: StreamId::new(stream),
            partition,
            publisher_id: "publisher-1".into(),
            msg_chain_id: "chain-1".into(),
        }
    }

    /// Same partition, different publisher.
    pub fn publisher(mut self, publisher_id: &str) -> Self {
        self.publisher_id = publisher_id.into();
        self
    }

    /// A record at `(ts, seq)` with a payload derived from its ref.
    pub fn record(&self, ts: i64, seq: u32) -> Record {
        Record {
            id: MessageId {
                stream_id: self.stream_id.clone(),
                partition: self.partition,
                timestamp: ts,
                sequence_number: seq,
                publisher_id: self.publisher_id.clone(),
                msg_chain_id: self.msg_chain_id.clone(),
            },
            payload: Bytes::from(format!("payload-{ts}-{seq}")),
        }
    }

    pub fn records(&self, refs: impl IntoIterator<Item = (i64, u32)>) -> Vec<Record> {
        refs.into_iter()
            .map(|(ts, seq)| self.record(ts, seq))
            .collect()
    }

    /// The record at `r`.
    pub fn record_at(&self, r: MessageRef) -> Record {
        self.record(r.timestamp, r.sequence_number)
    }

    /// A memory store holding a record for each ref.
    pub fn store_with(
        &self,
        refs: impl IntoIterator<Item = MessageRef>,
    ) -> Result<MemoryStore, StoreError> {
        MemoryStore::with_records(refs.into_iter().map(|r| self.record_at(r)))
    }

    pub fn request(&self, request_id: &str, options: QueryOptions) -> QueryRequest {
        QueryRequest {
            request_id: RequestId::new(request_id),
            consumer_id: "test-consumer".into(),
            stream_id: self.stream_id.clone(),
            partition: self.partition,
            options,
        }
    }

    /// A `Range` query over `[from, to]` with no publisher filter.
    pub fn range_request(&self, request_id: &str, from: (i64, u32), to: (i64, u32)) -> QueryRequest {
        self.request(
            request_id,
            QueryOptions::Range {
                from: from.into(),
                to: to.into(),
                publisher_id: None,
                msg_chain_id: None,
            },
        )
    }

    pub fn from_request(&self, request_id: &str, from: (i64, u32)) -> QueryRequest {
        self.request(
            request_id,
            QueryOptions::From {
                from: from.into(),
                publisher_id: None,
            },
        )
    }

    pub fn last_request(&self, request_id: &str, last: u32) -> QueryRequest {
        self.request(request_id, QueryOptions::Last { last })
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// The refs of `records`, in order.
pub fn refs_of(records: &[Record]) -> Vec<MessageRef> {
    records.iter().map(Record::message_ref).collect()
}

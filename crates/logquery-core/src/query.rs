//! Query requests and their resolved bounds.

use serde::{Deserialize, Serialize};

use crate::record::MessageId;
use crate::types::{MessageRef, RequestId, StreamId};

/// What a query asks for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOptions {
    /// The `last` most recent messages.
    Last { last: u32 },
    /// Every message from `from` onwards.
    From {
        from: MessageRef,
        publisher_id: Option<String>,
    },
    /// Every message in `[from, to]`, optionally narrowed to one publisher/chain.
    Range {
        from: MessageRef,
        to: MessageRef,
        publisher_id: Option<String>,
        msg_chain_id: Option<String>,
    },
}

/// One logical query, shared by the requester and every peer serving it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub request_id: RequestId,
    pub consumer_id: String,
    pub stream_id: StreamId,
    pub partition: u32,
    pub options: QueryOptions,
}

/// A fully-resolved range lookup against storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRange {
    pub stream_id: StreamId,
    pub partition: u32,
    pub from: MessageRef,
    pub to: MessageRef,
    pub publisher_id: Option<String>,
    pub msg_chain_id: Option<String>,
}

impl QueryRange {
    /// Whether `r` lies in `[from, to]`.
    pub fn contains(&self, r: &MessageRef) -> bool {
        self.from <= *r && *r <= self.to
    }

    /// Whether a message satisfies every predicate of this range.
    pub fn matches(&self, id: &MessageId) -> bool {
        id.stream_id == self.stream_id
            && id.partition == self.partition
            && self.contains(&id.message_ref())
            && self
                .publisher_id
                .as_ref()
                .map_or(true, |p| *p == id.publisher_id)
            && self
                .msg_chain_id
                .as_ref()
                .map_or(true, |c| *c == id.msg_chain_id)
    }
}

impl QueryRequest {
    /// Resolve the request to a storage range.
    ///
    /// `Last` queries have no static bounds and resolve to `None`. `From`
    /// extends to [`MessageRef::MAX`].
    pub fn bounds(&self) -> Option<QueryRange> {
        match &self.options {
            QueryOptions::Last { .. } => None,
            QueryOptions::From { from, publisher_id } => Some(QueryRange {
                stream_id: self.stream_id.clone(),
                partition: self.partition,
                from: *from,
                to: MessageRef::MAX,
                publisher_id: publisher_id.clone(),
                msg_chain_id: None,
            }),
            QueryOptions::Range {
                from,
                to,
                publisher_id,
                msg_chain_id,
            } => Some(QueryRange {
                stream_id: self.stream_id.clone(),
                partition: self.partition,
                from: *from,
                to: *to,
                publisher_id: publisher_id.clone(),
                msg_chain_id: msg_chain_id.clone(),
            }),
        }
    }

    /// The range used to re-query `[from, to]` of this request's stream,
    /// carrying its publisher and chain filters.
    pub fn sub_range(&self, from: MessageRef, to: MessageRef) -> QueryRange {
        let (publisher_id, msg_chain_id) = match &self.options {
            QueryOptions::Last { .. } => (None, None),
            QueryOptions::From { publisher_id, .. } => (publisher_id.clone(), None),
            QueryOptions::Range {
                publisher_id,
                msg_chain_id,
                ..
            } => (publisher_id.clone(), msg_chain_id.clone()),
        };
        QueryRange {
            stream_id: self.stream_id.clone(),
            partition: self.partition,
            from,
            to,
            publisher_id,
            msg_chain_id,
        }
    }
}

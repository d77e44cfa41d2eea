//! Store trait: the abstract interface for record lookups.
//!
//! This trait allows the reconciliation engine to be storage-agnostic.
//! Implementations include SQLite (primary) and in-memory (for tests).

use async_trait::async_trait;
use logquery_core::{MessageRef, QueryOptions, QueryRange, QueryRequest, Record, StreamId};

use crate::error::Result;
use crate::stream::RecordStream;

/// Result of storing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Record was inserted.
    Inserted,
    /// A record with the same message id already exists (idempotent, not an error).
    AlreadyExists,
}

/// The Store trait: async interface for record persistence.
///
/// All methods are async to support both sync (SQLite) and async backends.
/// For SQLite, `spawn_blocking` is used internally to avoid blocking the runtime.
///
/// A store is shared by every concurrently active query, so `store` must be
/// safe to interleave with open range queries.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Records of `range`, ascending by ref.
    async fn query_range(&self, range: &QueryRange) -> Result<RecordStream>;

    /// Up to `count` most recent records of a stream partition,
    /// most-recent-first.
    async fn query_last(
        &self,
        stream_id: &StreamId,
        partition: u32,
        count: u32,
    ) -> Result<RecordStream>;

    /// Every record of a stream partition whose ref is in `refs`,
    /// ascending by ref.
    async fn query_by_refs(
        &self,
        stream_id: &StreamId,
        partition: u32,
        refs: &[MessageRef],
    ) -> Result<RecordStream>;

    /// Persist a record. Idempotent for an already stored message id.
    async fn store(&self, record: &Record) -> Result<InsertResult>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Open the local lookup for a whole request, ascending by ref.
    ///
    /// `Last` queries come back from storage most-recent-first, so the
    /// bounded result is collected and reversed.
    fn open_query(
        &self,
        request: &QueryRequest,
    ) -> impl std::future::Future<Output = Result<RecordStream>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn open_query(&self, request: &QueryRequest) -> Result<RecordStream> {
        match &request.options {
            QueryOptions::Last { last } => {
                let mut records = self
                    .query_last(&request.stream_id, request.partition, *last)
                    .await?
                    .collect()
                    .await?;
                records.reverse();
                Ok(RecordStream::from_records(records))
            }
            QueryOptions::From { .. } | QueryOptions::Range { .. } => match request.bounds() {
                Some(range) => self.query_range(&range).await,
                None => Ok(RecordStream::empty()),
            },
        }
    }
}

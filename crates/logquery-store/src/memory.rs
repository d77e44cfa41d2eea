//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use logquery_core::{MessageRef, QueryRange, Record, StreamId};

use crate::error::{Result, StoreError};
use crate::stream::RecordStream;
use crate::traits::{InsertResult, Store};

/// Order key inside one partition: ref first, then publisher and chain so
/// that records sharing a ref stay distinct.
type RecordKey = (MessageRef, String, String);

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Records per (stream, partition), ordered by key.
    partitions: HashMap<(StreamId, u32), BTreeMap<RecordKey, Record>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Create a store pre-filled with `records`.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Result<Self> {
        let store = Self::new();
        {
            let mut inner = store.write()?;
            for record in records {
                inner.insert(record);
            }
        }
        Ok(store)
    }

    /// Number of records stored across all partitions.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.partitions.values().map(BTreeMap::len).sum())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn insert(&mut self, record: Record) -> InsertResult {
        let key = (
            record.message_ref(),
            record.id.publisher_id.clone(),
            record.id.msg_chain_id.clone(),
        );
        let partition = self
            .partitions
            .entry((record.id.stream_id.clone(), record.id.partition))
            .or_default();
        if partition.contains_key(&key) {
            return InsertResult::AlreadyExists;
        }
        partition.insert(key, record);
        InsertResult::Inserted
    }

    fn partition(&self, stream_id: &StreamId, partition: u32) -> Option<&BTreeMap<RecordKey, Record>> {
        self.partitions.get(&(stream_id.clone(), partition))
    }
}

fn lower_key(r: MessageRef) -> RecordKey {
    (r, String::new(), String::new())
}

#[async_trait]
impl Store for MemoryStore {
    async fn query_range(&self, range: &QueryRange) -> Result<RecordStream> {
        let inner = self.read()?;
        let Some(partition) = inner.partition(&range.stream_id, range.partition) else {
            return Ok(RecordStream::empty());
        };
        if range.from > range.to {
            return Ok(RecordStream::empty());
        }

        let records: Vec<Record> = partition
            .range(lower_key(range.from)..)
            .take_while(|((r, _, _), _)| *r <= range.to)
            .filter(|(_, record)| range.matches(&record.id))
            .map(|(_, record)| record.clone())
            .collect();
        Ok(RecordStream::from_records(records))
    }

    async fn query_last(
        &self,
        stream_id: &StreamId,
        partition: u32,
        count: u32,
    ) -> Result<RecordStream> {
        let inner = self.read()?;
        let records: Vec<Record> = inner
            .partition(stream_id, partition)
            .map(|p| p.values().rev().take(count as usize).cloned().collect())
            .unwrap_or_default();
        Ok(RecordStream::from_records(records))
    }

    async fn query_by_refs(
        &self,
        stream_id: &StreamId,
        partition: u32,
        refs: &[MessageRef],
    ) -> Result<RecordStream> {
        let inner = self.read()?;
        let Some(records_by_key) = inner.partition(stream_id, partition) else {
            return Ok(RecordStream::empty());
        };

        let wanted: BTreeSet<MessageRef> = refs.iter().copied().collect();
        let mut records = Vec::new();
        for r in wanted {
            records.extend(
                records_by_key
                    .range(lower_key(r)..)
                    .take_while(|((key_ref, _, _), _)| *key_ref == r)
                    .map(|(_, record)| record.clone()),
            );
        }
        Ok(RecordStream::from_records(records))
    }

    async fn store(&self, record: &Record) -> Result<InsertResult> {
        let mut inner = self.write()?;
        Ok(inner.insert(record.clone()))
    }
}

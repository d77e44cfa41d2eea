//! A store whose lookups are fed by the test.
//!
//! Range and last-N lookups hand out scripted streams in call order, then
//! fall back to an inner [`MemoryStore`]. Writes always reach the inner
//! store unless failures are switched on.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use logquery_core::{MessageRef, QueryRange, Record, StreamId};
use logquery_store::{
    InsertResult, MemoryStore, RecordSink, RecordStream, Result, Store, StoreError,
};

/// Scriptable [`Store`] for pinning down interleavings in tests.
pub struct ScriptedStore {
    inner: MemoryStore,
    scripted: Mutex<VecDeque<RecordStream>>,
    range_calls: Mutex<Vec<QueryRange>>,
    fail_stores: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            scripted: Mutex::new(VecDeque::new()),
            range_calls: Mutex::new(Vec::new()),
            fail_stores: AtomicBool::new(false),
        }
    }

    /// Queue a channel-backed stream for the next lookup. The test sends
    /// records through the returned sink and drops it to end the stream.
    pub fn script_channel(&self) -> RecordSink {
        let (sink, stream) = RecordStream::channel(64);
        self.script(stream);
        sink
    }

    /// Queue `stream` as the answer to the next lookup.
    pub fn script(&self, stream: RecordStream) {
        lock(&self.scripted).push_back(stream);
    }

    /// Every range lookup made so far, in order.
    pub fn range_calls(&self) -> Vec<QueryRange> {
        lock(&self.range_calls).clone()
    }

    /// Make every later `store` call fail.
    pub fn fail_stores(&self, fail: bool) {
        self.fail_stores.store(fail, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn next_scripted(&self) -> Option<RecordStream> {
        lock(&self.scripted).pop_front()
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn query_range(&self, range: &QueryRange) -> Result<RecordStream> {
        lock(&self.range_calls).push(range.clone());
        match self.next_scripted() {
            Some(stream) => Ok(stream),
            None => self.inner.query_range(range).await,
        }
    }

    async fn query_last(
        &self,
        stream_id: &StreamId,
        partition: u32,
        count: u32,
    ) -> Result<RecordStream> {
        match self.next_scripted() {
            Some(stream) => Ok(stream),
            None => self.inner.query_last(stream_id, partition, count).await,
        }
    }

    async fn query_by_refs(
        &self,
        stream_id: &StreamId,
        partition: u32,
        refs: &[MessageRef],
    ) -> Result<RecordStream> {
        self.inner.query_by_refs(stream_id, partition, refs).await
    }

    async fn store(&self, record: &Record) -> Result<InsertResult> {
        if self.fail_stores.load(Ordering::SeqCst) {
            return Err(StoreError::QueryFailed("scripted store failure".into()));
        }
        self.inner.store(record).await
    }
}

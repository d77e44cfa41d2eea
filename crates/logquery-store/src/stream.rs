//! Ordered record streams returned by storage lookups.
//!
//! A [`RecordStream`] is finite: it yields records until exhausted, or
//! yields one error and then ends. Reading is cancel-safe, so a stream can
//! sit in a `tokio::select!` branch.

use std::collections::VecDeque;

use logquery_core::Record;
use tokio::sync::mpsc;

use crate::error::{Result, StoreError};

enum Source {
    Buffered(VecDeque<Record>),
    Channel(mpsc::Receiver<Result<Record>>),
    Failed(Option<StoreError>),
}

/// A finite sequence of records produced by a storage lookup.
pub struct RecordStream {
    source: Source,
    done: bool,
}

/// Producer side of a channel-backed [`RecordStream`].
///
/// Dropping the sink ends the stream.
#[derive(Clone)]
pub struct RecordSink {
    tx: mpsc::Sender<Result<Record>>,
}

impl RecordStream {
    /// A stream fed by a [`RecordSink`], for producers that yield over time.
    pub fn channel(capacity: usize) -> (RecordSink, RecordStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            RecordSink { tx },
            RecordStream {
                source: Source::Channel(rx),
                done: false,
            },
        )
    }

    /// A stream over records that are already in memory.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            source: Source::Buffered(records.into_iter().collect()),
            done: false,
        }
    }

    pub fn empty() -> Self {
        Self::from_records(Vec::new())
    }

    /// A stream that yields `err` and ends.
    pub fn failed(err: StoreError) -> Self {
        Self {
            source: Source::Failed(Some(err)),
            done: false,
        }
    }

    /// Next record, `None` once exhausted. After an error the stream ends.
    pub async fn next(&mut self) -> Option<Result<Record>> {
        if self.done {
            return None;
        }
        let item = match &mut self.source {
            Source::Buffered(records) => records.pop_front().map(Ok),
            Source::Channel(rx) => rx.recv().await,
            Source::Failed(err) => err.take().map(Err),
        };
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }

    /// Drain the stream, stopping at the first error.
    pub async fn collect(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(item) = self.next().await {
            records.push(item?);
        }
        Ok(records)
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.source {
            Source::Buffered(records) => format!("buffered({})", records.len()),
            Source::Channel(_) => "channel".to_string(),
            Source::Failed(_) => "failed".to_string(),
        };
        f.debug_struct("RecordStream")
            .field("source", &kind)
            .field("done", &self.done)
            .finish()
    }
}

impl RecordSink {
    /// Send one record. Returns `false` if the stream was dropped.
    pub async fn send(&self, record: Record) -> bool {
        self.tx.send(Ok(record)).await.is_ok()
    }

    /// Fail the stream. The reader sees `err` and then the end.
    pub async fn fail(self, err: StoreError) {
        let _ = self.tx.send(Err(err)).await;
    }

    /// Whether the reading side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

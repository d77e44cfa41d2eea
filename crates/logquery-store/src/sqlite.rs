//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for logquery. It uses rusqlite
//! with bundled SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection};

use logquery_core::{MessageId, MessageRef, QueryRange, Record, StreamId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::stream::RecordStream;
use crate::traits::{InsertResult, Store};

const SELECT_COLUMNS: &str = "stream_id, stream_partition, timestamp, sequence_number, \
                              publisher_id, msg_chain_id, payload";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::LockPoisoned(format!("sqlite connection: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::TaskFailed(e.to_string()))?
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let payload: Vec<u8> = row.get("payload")?;
    Ok(Record {
        id: MessageId {
            stream_id: StreamId::new(row.get::<_, String>("stream_id")?),
            partition: row.get("stream_partition")?,
            timestamp: row.get("timestamp")?,
            sequence_number: row.get("sequence_number")?,
            publisher_id: row.get("publisher_id")?,
            msg_chain_id: row.get("msg_chain_id")?,
        },
        payload: Bytes::from(payload),
    })
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl Store for SqliteStore {
    async fn query_range(&self, range: &QueryRange) -> Result<RecordStream> {
        let range = range.clone();

        let records = self
            .blocking(move |conn| {
                // Lexicographic bounds on (timestamp, sequence_number)
                let sql = format!(
                    "SELECT {SELECT_COLUMNS} FROM records
                     WHERE stream_id = ?1 AND stream_partition = ?2
                       AND (timestamp > ?3 OR (timestamp = ?3 AND sequence_number >= ?4))
                       AND (timestamp < ?5 OR (timestamp = ?5 AND sequence_number <= ?6))
                       AND (?7 IS NULL OR publisher_id = ?7)
                       AND (?8 IS NULL OR msg_chain_id = ?8)
                     ORDER BY timestamp, sequence_number, publisher_id, msg_chain_id"
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(
                    params![
                        range.stream_id.as_str(),
                        range.partition,
                        range.from.timestamp,
                        range.from.sequence_number,
                        range.to.timestamp,
                        range.to.sequence_number,
                        range.publisher_id,
                        range.msg_chain_id,
                    ],
                    row_to_record,
                )?;
                let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await?;

        Ok(RecordStream::from_records(records))
    }

    async fn query_last(
        &self,
        stream_id: &StreamId,
        partition: u32,
        count: u32,
    ) -> Result<RecordStream> {
        let stream_id = stream_id.clone();

        let records = self
            .blocking(move |conn| {
                let sql = format!(
                    "SELECT {SELECT_COLUMNS} FROM records
                     WHERE stream_id = ?1 AND stream_partition = ?2
                     ORDER BY timestamp DESC, sequence_number DESC, publisher_id DESC, msg_chain_id DESC
                     LIMIT ?3"
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(
                    params![stream_id.as_str(), partition, count],
                    row_to_record,
                )?;
                let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await?;

        Ok(RecordStream::from_records(records))
    }

    async fn query_by_refs(
        &self,
        stream_id: &StreamId,
        partition: u32,
        refs: &[MessageRef],
    ) -> Result<RecordStream> {
        let stream_id = stream_id.clone();
        let mut refs = refs.to_vec();
        refs.sort();
        refs.dedup();

        let records = self
            .blocking(move |conn| {
                let sql = format!(
                    "SELECT {SELECT_COLUMNS} FROM records
                     WHERE stream_id = ?1 AND stream_partition = ?2
                       AND timestamp = ?3 AND sequence_number = ?4
                     ORDER BY publisher_id, msg_chain_id"
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let mut records = Vec::new();
                for r in refs {
                    let rows = stmt.query_map(
                        params![stream_id.as_str(), partition, r.timestamp, r.sequence_number],
                        row_to_record,
                    )?;
                    for row in rows {
                        records.push(row?);
                    }
                }
                Ok(records)
            })
            .await?;

        Ok(RecordStream::from_records(records))
    }

    async fn store(&self, record: &Record) -> Result<InsertResult> {
        let record = record.clone();

        self.blocking(move |conn| {
            let id = &record.id;
            let changed = conn.execute(
                "INSERT OR IGNORE INTO records (
                    stream_id, stream_partition, timestamp, sequence_number,
                    publisher_id, msg_chain_id, payload, ingested_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id.stream_id.as_str(),
                    id.partition,
                    id.timestamp,
                    id.sequence_number,
                    id.publisher_id,
                    id.msg_chain_id,
                    record.payload.as_ref(),
                    now_millis(),
                ],
            )?;

            Ok(if changed == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: i64, seq: u32, publisher: &str) -> Record {
        Record::new(
            MessageId {
                stream_id: StreamId::new("stream"),
                partition: 0,
                timestamp: ts,
                sequence_number: seq,
                publisher_id: publisher.into(),
                msg_chain_id: "chain".into(),
            },
            format!("payload-{ts}-{seq}").into_bytes(),
        )
    }

    fn full_range() -> QueryRange {
        QueryRange {
            stream_id: StreamId::new("stream"),
            partition: 0,
            from: MessageRef::MIN,
            to: MessageRef::MAX,
            publisher_id: None,
            msg_chain_id: None,
        }
    }

    fn refs(records: &[Record]) -> Vec<MessageRef> {
        records.iter().map(Record::message_ref).collect()
    }

    #[tokio::test]
    async fn test_store_and_query_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let r = record(10, 2, "p");

        assert_eq!(store.store(&r).await.unwrap(), InsertResult::Inserted);

        let records = store
            .query_range(&full_range())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(records, vec![r]);
    }

    #[tokio::test]
    async fn test_idempotent_store() {
        let store = SqliteStore::open_memory().unwrap();
        let r = record(1, 0, "p");

        assert_eq!(store.store(&r).await.unwrap(), InsertResult::Inserted);
        assert_eq!(store.store(&r).await.unwrap(), InsertResult::AlreadyExists);
    }

    #[tokio::test]
    async fn test_range_bounds_are_lexicographic() {
        let store = SqliteStore::open_memory().unwrap();
        for (ts, seq) in [(1, 5), (2, 0), (2, 3), (2, 9), (3, 0)] {
            store.store(&record(ts, seq, "p")).await.unwrap();
        }

        let mut range = full_range();
        range.from = MessageRef::new(1, 6);
        range.to = MessageRef::new(2, 3);
        let records = store.query_range(&range).await.unwrap().collect().await.unwrap();

        assert_eq!(refs(&records), vec![MessageRef::new(2, 0), MessageRef::new(2, 3)]);
    }

    #[tokio::test]
    async fn test_range_filters() {
        let store = SqliteStore::open_memory().unwrap();
        store.store(&record(1, 0, "alice")).await.unwrap();
        store.store(&record(2, 0, "bob")).await.unwrap();

        let mut range = full_range();
        range.publisher_id = Some("alice".into());
        let records = store.query_range(&range).await.unwrap().collect().await.unwrap();
        assert_eq!(refs(&records), vec![MessageRef::new(1, 0)]);

        range.publisher_id = None;
        range.msg_chain_id = Some("other-chain".into());
        let records = store.query_range(&range).await.unwrap().collect().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_query_last() {
        let store = SqliteStore::open_memory().unwrap();
        for ts in 1..=4 {
            store.store(&record(ts, 0, "p")).await.unwrap();
        }

        let records = store
            .query_last(&StreamId::new("stream"), 0, 3)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(
            refs(&records),
            vec![MessageRef::new(4, 0), MessageRef::new(3, 0), MessageRef::new(2, 0)]
        );
    }

    #[tokio::test]
    async fn test_query_by_refs() {
        let store = SqliteStore::open_memory().unwrap();
        for ts in 1..=4 {
            store.store(&record(ts, 0, "p")).await.unwrap();
        }

        let records = store
            .query_by_refs(
                &StreamId::new("stream"),
                0,
                &[MessageRef::new(3, 0), MessageRef::new(1, 0), MessageRef::new(3, 0)],
            )
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(refs(&records), vec![MessageRef::new(1, 0), MessageRef::new(3, 0)]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.store(&record(7, 1, "p")).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let records = store
            .query_range(&full_range())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(refs(&records), vec![MessageRef::new(7, 1)]);
    }
}

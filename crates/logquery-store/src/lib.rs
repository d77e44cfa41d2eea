//! # Logquery Store
//!
//! Storage collaborator for logquery. Provides a trait-based interface
//! for record lookups with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The reconciliation engine never touches a database directly. It asks the
//! [`Store`] trait for ordered [`RecordStream`]s and hands propagated
//! records back to it. The primary implementation is [`SqliteStore`], with
//! [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`StoreExt`] - Resolves a whole [`QueryRequest`](logquery_core::QueryRequest) to an ascending stream
//! - [`RecordStream`] / [`RecordSink`] - A finite, ordered sequence of records
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`InsertResult`] - Result of storing a record
//!
//! ## Usage
//!
//! ```rust,no_run
//! use logquery_core::{MessageRef, QueryRange, StreamId};
//! use logquery_store::{SqliteStore, Store};
//!
//! async fn example() -> logquery_store::Result<()> {
//!     let store = SqliteStore::open_memory()?;
//!
//!     let range = QueryRange {
//!         stream_id: StreamId::new("sensors"),
//!         partition: 0,
//!         from: MessageRef::MIN,
//!         to: MessageRef::MAX,
//!         publisher_id: None,
//!         msg_chain_id: None,
//!     };
//!     let records = store.query_range(&range).await?.collect().await?;
//!     println!("{} records", records.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent stores**: Storing the same message id twice returns `AlreadyExists`
//! - **Ascending ranges**: `query_range` and `query_by_refs` yield ascending refs;
//!   `query_last` yields most-recent-first
//! - **Errors in-band**: a stream that fails mid-way yields one `Err` and ends

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod stream;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use stream::{RecordSink, RecordStream};
pub use traits::{InsertResult, Store, StoreExt};

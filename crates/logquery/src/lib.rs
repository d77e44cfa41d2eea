//! # Logquery
//!
//! The unified API for logquery: nodes that each hold part of a message
//! log and answer historical queries with everything the network holds.
//!
//! ## Overview
//!
//! A [`Node`] wires three pieces together:
//!
//! - **Storage**: a [`store::Store`] holding this node's records
//! - **Transport**: a [`sync::Transport`] connecting it to peers
//! - **Resolver**: a [`sync::QueryResolver`] running one Aggregator per
//!   query issued here and one Propagator per query served for a peer
//!
//! A query returns a single ordered, deduplicated record sequence. Records
//! this node was missing are stored locally as they arrive.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use logquery::{Node, NodeConfig, QueryOptions};
//! use logquery::store::SqliteStore;
//! use logquery::sync::{MemoryNetwork, NodeId};
//! use logquery::core::{MessageRef, StreamId};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let transport = network.create_transport(NodeId::random()).await;
//!
//!     let store = SqliteStore::open("records.db").unwrap();
//!     let node = Node::start(store, transport, NodeConfig::default());
//!
//!     let output = node
//!         .query(
//!             StreamId::new("sensor-readings"),
//!             0,
//!             QueryOptions::From {
//!                 from: MessageRef::new(0, 0),
//!                 publisher_id: None,
//!             },
//!         )
//!         .await
//!         .unwrap();
//!     let records = output.collect().await.unwrap();
//!     println!("{} records", records.len());
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `logquery::core` - Ordering primitives, ledgers, records and queries
//! - `logquery::store` - Storage abstraction, memory and SQLite stores
//! - `logquery::sync` - Aggregator, Propagator, resolver and transport

pub mod error;
pub mod node;

// Re-export component crates
pub use logquery_core as core;
pub use logquery_store as store;
pub use logquery_sync as sync;

// Re-export main types for convenience
pub use error::{NodeError, Result};
pub use node::{Node, NodeConfig};

// Re-export commonly used types
pub use logquery_core::{MessageId, MessageRef, QueryOptions, QueryRequest, Record, RequestId, StreamId};
pub use logquery_sync::{AggregatorStatus, NodeId, QueryOutput, QueryState};

//! # Logquery Sync
//!
//! Distributed resolution of historical range queries.
//!
//! ## Overview
//!
//! Every node holds a partial copy of a message log. A query issued at one
//! node is answered with the merged, deduplicated, strictly ordered union of
//! what every participating node holds, and records a node was missing are
//! repaired into its local store on the way.
//!
//! ## Roles
//!
//! - [`Aggregator`] - runs on the requesting node; merges local results,
//!   peer existence reports and propagated records into one ordered output
//! - [`Propagator`] - runs on each serving node, one per requester; reports
//!   local refs and pushes the records the requester lacks
//! - [`QueryResolver`] - per-node registry that routes [`SystemMessage`]s
//!   to the right actor
//!
//! ## Message Flow
//!
//! ```text
//! Requester                              Peer
//!   |-------- QueryRequest -------------->|
//!   |<------- QueryResponse (refs) -------|
//!   |-------- QueryResponse (refs) ------>|
//!   |<------- QueryPropagate (records) ---|
//!   |<------- QueryResponse (final) ------|
//!   |-------- QueryResponse (final) ----->|
//! ```
//!
//! ## Guarantees
//!
//! - **Ordered**: output refs strictly ascend, with no duplicates
//! - **Complete**: once every source finalizes, every record any of them
//!   reported is emitted
//! - **Repairing**: propagated records are stored before they are emitted

pub mod aggregator;
pub mod config;
pub mod error;
pub mod messages;
pub mod output;
pub mod propagator;
pub mod resolver;
pub mod transport;

pub use aggregator::Aggregator;
pub use config::QueryConfig;
pub use error::{ProtocolViolation, QueryError, Result};
pub use messages::{limits, MessageType, NodeId, QueryPropagate, QueryResponse, SystemMessage};
pub use output::{AggregatorStatus, QueryOutput, QueryState, SourceState};
pub use propagator::{CloseCallback, Propagator};
pub use resolver::{Outbound, QueryResolver};
pub use transport::{memory::MemoryNetwork, memory::MemoryTransport, Transport};

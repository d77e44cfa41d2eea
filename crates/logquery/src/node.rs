//! The Node: one participant in the query network.
//!
//! A Node owns a store and a transport, answers peers' queries from its
//! store, and resolves its own queries across every connected peer.

use std::sync::Arc;

use logquery_core::{validate_message_id, QueryOptions, QueryRequest, Record, RequestId, StreamId};
use logquery_store::{InsertResult, Store};
use logquery_sync::{
    AggregatorStatus, NodeId, Outbound, QueryConfig, QueryError, QueryOutput, QueryResolver,
    Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;

/// Configuration for a Node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Whether to validate records on ingest.
    pub validate_on_ingest: bool,
    /// Per-query actor configuration.
    pub query: QueryConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            validate_on_ingest: true,
            query: QueryConfig::default(),
        }
    }
}

/// A running node.
///
/// Starting a node spawns two background tasks: a dispatch loop feeding
/// inbound messages to the resolver, and a pump sending the resolver's
/// outbound messages through the transport.
pub struct Node<S: Store, T: Transport + 'static> {
    node_id: NodeId,
    resolver: Arc<QueryResolver<S>>,
    transport: Arc<T>,
    config: NodeConfig,
    dispatch: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl<S: Store, T: Transport + 'static> Node<S, T> {
    /// Start a node. Must be called from within a tokio runtime.
    pub fn start(store: S, transport: T, config: NodeConfig) -> Self {
        let node_id = transport.local_node_id();
        let transport = Arc::new(transport);
        let (resolver, outbox) = QueryResolver::new(Arc::new(store), config.query.clone());
        let resolver = Arc::new(resolver);

        let dispatch = tokio::spawn(dispatch_loop(resolver.clone(), transport.clone()));
        let pump = tokio::spawn(outbox_pump(outbox, transport.clone()));
        debug!(node = %node_id, "node started");

        Self {
            node_id,
            resolver,
            transport,
            config,
            dispatch,
            pump,
        }
    }

    /// This node's identity on the network.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        self.resolver.storage()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Store a record locally.
    pub async fn ingest(&self, record: &Record) -> Result<InsertResult> {
        if self.config.validate_on_ingest {
            validate_message_id(&record.id)?;
        }
        Ok(self.store().store(record).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Query one stream partition across this node and every connected peer.
    pub async fn query(
        &self,
        stream_id: StreamId,
        partition: u32,
        options: QueryOptions,
    ) -> Result<QueryOutput> {
        let request = QueryRequest {
            request_id: RequestId::random(),
            consumer_id: self.node_id.to_string(),
            stream_id,
            partition,
            options,
        };
        self.query_request(request).await
    }

    /// Run a fully specified request across every connected peer.
    pub async fn query_request(&self, request: QueryRequest) -> Result<QueryOutput> {
        let peers = self.transport.connected_peers().await?;
        debug!(
            node = %self.node_id,
            request_id = %request.request_id,
            peers = peers.len(),
            "issuing query"
        );
        Ok(self.resolver.resolve(request, peers)?)
    }

    /// Sources of a running query and whether each has finalized.
    pub fn query_status(&self, request_id: &RequestId) -> Option<AggregatorStatus> {
        self.resolver.status(request_id)
    }

    /// Abandon a query issued here. Its output ends without an error.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        self.resolver.cancel(request_id)
    }

    /// Queries issued here that are still running.
    pub fn active_queries(&self) -> usize {
        self.resolver.active_queries()
    }

    /// Queries served here for peers that are still running.
    pub fn active_propagations(&self) -> usize {
        self.resolver.active_propagations()
    }

    /// Stop both background loops and cancel every running query.
    pub fn shutdown(self) {
        self.dispatch.abort();
        self.pump.abort();
        self.resolver.shutdown();
        debug!(node = %self.node_id, "node stopped");
    }
}

async fn dispatch_loop<S: Store, T: Transport>(resolver: Arc<QueryResolver<S>>, transport: Arc<T>) {
    loop {
        match transport.recv().await {
            Ok((from, message)) => {
                let request_id = message.request_id().clone();
                if let Err(err) = resolver.dispatch(from, message) {
                    warn!(from = %from, request_id = %request_id, error = %err, "rejected message");
                }
            }
            Err(QueryError::Transport(reason)) => {
                debug!(reason = %reason, "transport closed, dispatch loop exiting");
                return;
            }
            Err(err) => warn!(error = %err, "undecodable message dropped"),
        }
    }
}

async fn outbox_pump<T: Transport>(mut outbox: mpsc::UnboundedReceiver<Outbound>, transport: Arc<T>) {
    while let Some((to, message)) = outbox.recv().await {
        let kind = message.message_type();
        if let Err(err) = transport.send(&to, message).await {
            warn!(to = %to, kind = ?kind, error = %err, "outbound message dropped");
        }
    }
}

//! Per-node registry of running queries.
//!
//! The resolver owns one Aggregator per query this node requested and one
//! Propagator per (query, requester) it serves, wires their callbacks to an
//! outbox of addressed [`SystemMessage`]s, and routes inbound messages to
//! the right actor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use logquery_core::{
    validate_request, ChunkCallback, MessageRef, QueryRequest, Record, RequestId,
};
use logquery_store::Store;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::aggregator::Aggregator;
use crate::config::QueryConfig;
use crate::error::{ProtocolViolation, QueryError, Result};
use crate::messages::{NodeId, QueryPropagate, QueryResponse, SystemMessage};
use crate::output::{AggregatorStatus, QueryOutput};
use crate::propagator::{CloseCallback, Propagator};

/// An outbound message and its destination.
pub type Outbound = (NodeId, SystemMessage);

type PropagatorKey = (RequestId, NodeId);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Routes queries and peer messages for one node.
pub struct QueryResolver<S: Store> {
    storage: Arc<S>,
    config: QueryConfig,
    outbox: mpsc::UnboundedSender<Outbound>,
    aggregators: Mutex<HashMap<RequestId, Aggregator>>,
    propagators: Arc<Mutex<HashMap<PropagatorKey, Propagator>>>,
}

impl<S: Store> QueryResolver<S> {
    /// Create a resolver. Everything it wants sent appears on the returned
    /// receiver, in the order it was produced.
    pub fn new(storage: Arc<S>, config: QueryConfig) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let resolver = Self {
            storage,
            config,
            outbox,
            aggregators: Mutex::new(HashMap::new()),
            propagators: Arc::new(Mutex::new(HashMap::new())),
        };
        (resolver, rx)
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Resolve `request` across this node and `peers`.
    ///
    /// Sends the request to every peer, then reports this node's own refs to
    /// each of them so they can propagate what is missing here.
    pub fn resolve(&self, request: QueryRequest, peers: Vec<NodeId>) -> Result<QueryOutput> {
        validate_request(&request)?;
        let request_id = request.request_id.clone();

        // Held until the aggregator is registered, so an early reply cannot
        // miss it.
        let mut aggregators = lock(&self.aggregators);
        aggregators.retain(|_, aggregator| !aggregator.is_closed());
        if aggregators.contains_key(&request_id) {
            return Err(QueryError::InvalidMessage(format!(
                "duplicate request id {request_id}"
            )));
        }

        // Peers must see the request before any of our refs for it.
        for peer in &peers {
            self.send(*peer, SystemMessage::QueryRequest(request.clone()));
        }

        let chunk_callback = self.broadcast_refs(request_id.clone(), peers.clone());
        let peer_count = peers.len();
        let (aggregator, output) = Aggregator::spawn(
            self.storage.clone(),
            request,
            peers,
            chunk_callback,
            &self.config,
        )?;
        aggregators.insert(request_id.clone(), aggregator);

        debug!(request_id = %request_id, peers = peer_count, "query started");
        Ok(output)
    }

    /// Serve a query requested by `from`.
    pub fn on_request(&self, from: NodeId, request: QueryRequest) -> Result<()> {
        let key = (request.request_id.clone(), from);
        let mut propagators = lock(&self.propagators);
        if propagators.contains_key(&key) {
            warn!(request_id = %key.0, requester = %from, "duplicate query request ignored");
            return Ok(());
        }

        let request_id = request.request_id.clone();
        let propagator = Propagator::spawn(
            self.storage.clone(),
            request,
            from,
            self.respond_to(request_id.clone(), from),
            self.propagate_to(request_id, from),
            self.on_propagator_close(key.clone()),
            &self.config,
        )?;
        propagators.insert(key, propagator);
        Ok(())
    }

    /// Route an existence report. A report for a query this node requested
    /// goes to its Aggregator; otherwise it is the requester's side of a
    /// query this node serves.
    ///
    /// Routing never waits on a query's mailbox: a query that cannot keep
    /// up fails on its own.
    pub fn on_response(&self, from: NodeId, response: QueryResponse) -> Result<()> {
        if let Some(aggregator) = self.aggregator(&response.request_id) {
            return aggregator.try_foreign_response(from, response);
        }
        let propagator = lock(&self.propagators)
            .get(&(response.request_id.clone(), from))
            .cloned();
        match propagator {
            Some(propagator) => propagator.try_requester_response(response),
            None => Err(ProtocolViolation::UnknownRequest(response.request_id).into()),
        }
    }

    pub fn on_propagate(&self, from: NodeId, propagate: QueryPropagate) -> Result<()> {
        match self.aggregator(&propagate.request_id) {
            Some(aggregator) => aggregator.try_foreign_propagation(from, propagate),
            None => Err(ProtocolViolation::UnknownRequest(propagate.request_id).into()),
        }
    }

    /// Route any inbound message.
    pub fn dispatch(&self, from: NodeId, message: SystemMessage) -> Result<()> {
        match message {
            SystemMessage::QueryRequest(request) => self.on_request(from, request),
            SystemMessage::QueryResponse(response) => self.on_response(from, response),
            SystemMessage::QueryPropagate(propagate) => self.on_propagate(from, propagate),
        }
    }

    /// Cancel a query this node requested. Returns `false` if it is unknown.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        match lock(&self.aggregators).remove(request_id) {
            Some(aggregator) => {
                aggregator.cancel();
                true
            }
            None => false,
        }
    }

    /// Status of a query this node requested.
    pub fn status(&self, request_id: &RequestId) -> Option<AggregatorStatus> {
        self.aggregator(request_id).map(|a| a.status())
    }

    /// Queries requested here that have not closed.
    pub fn active_queries(&self) -> usize {
        let mut aggregators = lock(&self.aggregators);
        aggregators.retain(|_, aggregator| !aggregator.is_closed());
        aggregators.len()
    }

    /// Queries served here for other nodes that have not closed.
    pub fn active_propagations(&self) -> usize {
        lock(&self.propagators)
            .values()
            .filter(|p| !p.is_closed())
            .count()
    }

    /// Cancel everything this node is running.
    pub fn shutdown(&self) {
        for (_, aggregator) in lock(&self.aggregators).drain() {
            aggregator.cancel();
        }
        for (_, propagator) in lock(&self.propagators).drain() {
            propagator.cancel();
        }
    }

    /// A running aggregator. Closed ones are unregistered on sight.
    fn aggregator(&self, request_id: &RequestId) -> Option<Aggregator> {
        let mut aggregators = lock(&self.aggregators);
        let aggregator = aggregators.get(request_id).cloned()?;
        if aggregator.is_closed() {
            aggregators.remove(request_id);
            return None;
        }
        Some(aggregator)
    }

    fn send(&self, to: NodeId, message: SystemMessage) {
        if self.outbox.send((to, message)).is_err() {
            debug!(to = %to, "outbox closed, message dropped");
        }
    }

    fn broadcast_refs(&self, request_id: RequestId, peers: Vec<NodeId>) -> ChunkCallback<MessageRef> {
        let outbox = self.outbox.clone();
        Box::new(move |refs, is_final| {
            for peer in &peers {
                let response = QueryResponse::new(request_id.clone(), refs.clone(), is_final);
                let _ = outbox.send((*peer, SystemMessage::QueryResponse(response)));
            }
        })
    }

    fn respond_to(&self, request_id: RequestId, to: NodeId) -> ChunkCallback<MessageRef> {
        let outbox = self.outbox.clone();
        Box::new(move |refs, is_final| {
            let response = QueryResponse::new(request_id.clone(), refs, is_final);
            let _ = outbox.send((to, SystemMessage::QueryResponse(response)));
        })
    }

    fn propagate_to(&self, request_id: RequestId, to: NodeId) -> ChunkCallback<Record> {
        let outbox = self.outbox.clone();
        Box::new(move |payload: Vec<Record>, _is_final| {
            if payload.is_empty() {
                return;
            }
            let propagate = QueryPropagate {
                request_id: request_id.clone(),
                payload,
            };
            let _ = outbox.send((to, SystemMessage::QueryPropagate(propagate)));
        })
    }

    fn on_propagator_close(&self, key: PropagatorKey) -> CloseCallback {
        let propagators = Arc::clone(&self.propagators);
        Box::new(move |result| {
            if let Err(err) = result {
                warn!(request_id = %key.0, requester = %key.1, error = %err, "serving query failed");
            }
            lock(&propagators).remove(&key);
        })
    }
}

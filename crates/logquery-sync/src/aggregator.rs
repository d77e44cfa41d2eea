//! The Aggregator: resolves one query on the node that received it.
//!
//! It merges three inputs into one readiness ledger:
//!
//! - the node's own local query (confirmed refs),
//! - existence reports from foreign peers (unconfirmed refs),
//! - records propagated by foreign peers (stored, then confirmed).
//!
//! After every event it recomputes the ready prefix, re-queries local storage
//! for it and streams the result to the requester in strictly ascending ref
//! order. The task is an actor: the [`Aggregator`] handle only validates input
//! and feeds the mailbox, all ledger state lives inside the task.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use logquery_core::{
    max_ref, validate_record, validate_refs, validate_request, AggregationList, ChunkCallback,
    Chunker, MessageRef, QueryRange, QueryRequest, Record, RequestId,
};
use logquery_store::{RecordStream, Store, StoreExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::config::QueryConfig;
use crate::error::{ProtocolViolation, QueryError, Result};
use crate::messages::{NodeId, QueryPropagate, QueryResponse};
use crate::output::{AggregatorStatus, OutputSender, QueryOutput, QueryState, SourceState};

enum Command {
    Response { peer: NodeId, response: QueryResponse },
    Propagation { peer: NodeId, propagate: QueryPropagate },
}

/// Handle to a running Aggregator.
///
/// Cloning is cheap. Dropping every handle while a source is still
/// unfinalized cancels the query; once all sources are finalized the task
/// drains to completion on its own.
#[derive(Clone)]
pub struct Aggregator {
    request: Arc<QueryRequest>,
    mailbox: mpsc::Sender<Command>,
    overflow: mpsc::Sender<()>,
    status: watch::Receiver<AggregatorStatus>,
    abort: AbortHandle,
}

impl Aggregator {
    /// Start resolving `request`.
    ///
    /// `peers` are the foreign sources expected to respond; unknown peers
    /// that respond are registered on first contact. `chunk_callback`
    /// receives the refs of this node's own local result in wire-sized
    /// batches, the last one with `is_final = true`.
    pub fn spawn<S: Store>(
        storage: Arc<S>,
        request: QueryRequest,
        peers: Vec<NodeId>,
        chunk_callback: ChunkCallback<MessageRef>,
        config: &QueryConfig,
    ) -> Result<(Self, QueryOutput)> {
        validate_request(&request)?;

        let request = Arc::new(request);
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let (overflow_tx, overflow_rx) = mpsc::channel(1);
        let (output_tx, output_rx) = mpsc::channel(config.output_capacity.max(1));
        let (status_tx, status_rx) = watch::channel(AggregatorStatus::new(&peers));

        let task = AggregatorTask {
            storage,
            request: request.clone(),
            ledger: AggregationList::new(),
            primary: SourceState::default(),
            peers: peers.iter().map(|p| (*p, SourceState::default())).collect(),
            chunker: Some(Chunker::new(chunk_callback, config.chunker)),
            sub_queries: VecDeque::new(),
            active: None,
            last_emitted: None,
            emitted: 0,
            state: QueryState::Active,
            output: output_tx,
            status: status_tx,
        };

        debug!(
            request_id = %request.request_id,
            peers = peers.len(),
            "aggregator started"
        );
        let handle = tokio::spawn(task.run(mailbox_rx, overflow_rx));

        Ok((
            Self {
                request,
                mailbox: mailbox_tx,
                overflow: overflow_tx,
                status: status_rx,
                abort: handle.abort_handle(),
            },
            QueryOutput::new(output_rx),
        ))
    }

    /// The query this Aggregator resolves.
    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    /// Feed an existence report from `peer`.
    ///
    /// Malformed reports are rejected here and never reach the ledger.
    pub async fn on_foreign_response(&self, peer: NodeId, response: QueryResponse) -> Result<()> {
        check_request_id(&self.request.request_id, &response.request_id)?;
        validate_refs(&self.request, &response.refs)?;
        self.send(Command::Response { peer, response }).await
    }

    /// Feed records propagated by `peer`. They are stored locally before
    /// they count as confirmed.
    pub async fn on_foreign_propagation(
        &self,
        peer: NodeId,
        propagate: QueryPropagate,
    ) -> Result<()> {
        check_request_id(&self.request.request_id, &propagate.request_id)?;
        for record in &propagate.payload {
            validate_record(&self.request, record)?;
        }
        self.send(Command::Propagation { peer, propagate }).await
    }

    /// Like [`on_foreign_response`](Self::on_foreign_response), but never
    /// waits for mailbox space. A full mailbox fails this query with
    /// [`QueryError::Overloaded`], leaving other queries untouched.
    pub fn try_foreign_response(&self, peer: NodeId, response: QueryResponse) -> Result<()> {
        check_request_id(&self.request.request_id, &response.request_id)?;
        validate_refs(&self.request, &response.refs)?;
        self.try_send(Command::Response { peer, response })
    }

    /// Non-waiting counterpart of
    /// [`on_foreign_propagation`](Self::on_foreign_propagation).
    pub fn try_foreign_propagation(&self, peer: NodeId, propagate: QueryPropagate) -> Result<()> {
        check_request_id(&self.request.request_id, &propagate.request_id)?;
        for record in &propagate.payload {
            validate_record(&self.request, record)?;
        }
        self.try_send(Command::Propagation { peer, propagate })
    }

    /// Tear the query down immediately. The output ends without an error
    /// and no further callbacks run.
    pub fn cancel(&self) {
        debug!(request_id = %self.request.request_id, "aggregator cancelled");
        self.abort.abort();
    }

    /// Current sources, their finalization and progress.
    pub fn status(&self) -> AggregatorStatus {
        let mut status = self.status.borrow().clone();
        if self.is_closed() {
            status.state = QueryState::Closed;
        }
        status
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<AggregatorStatus> {
        self.status.clone()
    }

    /// Whether the query reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.mailbox
            .send(command)
            .await
            .map_err(|_| QueryError::Closed)
    }

    fn try_send(&self, command: Command) -> Result<()> {
        match self.mailbox.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(QueryError::Closed),
            Err(TrySendError::Full(_)) => {
                warn!(request_id = %self.request.request_id, "mailbox full, failing query");
                let _ = self.overflow.try_send(());
                Err(QueryError::Overloaded)
            }
        }
    }
}

pub(crate) fn check_request_id(expected: &RequestId, got: &RequestId) -> Result<()> {
    if expected != got {
        return Err(ProtocolViolation::RequestMismatch {
            expected: expected.clone(),
            got: got.clone(),
        }
        .into());
    }
    Ok(())
}

/// Next item of an optional stream; pending forever when there is none.
pub(crate) async fn next_record(
    stream: Option<&mut RecordStream>,
) -> Option<logquery_store::Result<Record>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

struct AggregatorTask<S> {
    storage: Arc<S>,
    request: Arc<QueryRequest>,
    ledger: AggregationList,
    primary: SourceState,
    peers: BTreeMap<NodeId, SourceState>,
    /// Wire batching of the local result; taken when the local query ends.
    chunker: Option<Chunker<MessageRef>>,
    /// Issued re-queries, drained in order. The front one is `active` once opened.
    sub_queries: VecDeque<QueryRange>,
    active: Option<RecordStream>,
    last_emitted: Option<MessageRef>,
    emitted: usize,
    state: QueryState,
    output: OutputSender,
    status: watch::Sender<AggregatorStatus>,
}

impl<S: Store> AggregatorTask<S> {
    async fn run(mut self, mut mailbox: mpsc::Receiver<Command>, mut overflow: mpsc::Receiver<()>) {
        let mut result = self.drive(&mut mailbox, &mut overflow).await;

        // Events accepted before the mailbox closed still get judged: every
        // source is finalized by now, so a late report is a violation.
        mailbox.close();
        while let Ok(command) = mailbox.try_recv() {
            if result.is_ok() {
                result = self.apply(command).await;
                continue;
            }
            let (Command::Response { peer, .. } | Command::Propagation { peer, .. }) = command;
            warn!(
                request_id = %self.request.request_id,
                peer = %peer,
                "event for closed query dropped"
            );
        }

        self.state = QueryState::Closed;
        self.publish();

        match result {
            Ok(()) => debug!(
                request_id = %self.request.request_id,
                emitted = self.emitted,
                "aggregator closed"
            ),
            Err(QueryError::Cancelled) => debug!(
                request_id = %self.request.request_id,
                "aggregator abandoned"
            ),
            Err(err) => {
                warn!(request_id = %self.request.request_id, error = %err, "query failed");
                let _ = self.output.send(Err(err)).await;
            }
        }
    }

    async fn drive(
        &mut self,
        mailbox: &mut mpsc::Receiver<Command>,
        overflow: &mut mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut local = Some(self.storage.open_query(&self.request).await?);
        let mut mailbox_open = true;

        loop {
            if self.recompute() == QueryState::Closed {
                return Ok(());
            }

            if self.active.is_none() {
                if let Some(range) = self.sub_queries.front() {
                    trace!(
                        request_id = %self.request.request_id,
                        from = %range.from,
                        to = %range.to,
                        "opening sub-query"
                    );
                    self.active = Some(self.storage.query_range(range).await?);
                }
            }

            // Every handle is gone and nothing local can still confirm the
            // remaining entries.
            if !mailbox_open && local.is_none() && self.active.is_none() {
                return Err(QueryError::Cancelled);
            }

            tokio::select! {
                item = next_record(local.as_mut()) => match item {
                    Some(Ok(record)) => self.on_local_record(&record),
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        local = None;
                        self.on_local_end();
                    }
                },
                item = next_record(self.active.as_mut()) => match item {
                    Some(Ok(record)) => self.forward(record).await?,
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        self.active = None;
                        self.sub_queries.pop_front();
                    }
                },
                command = mailbox.recv(), if mailbox_open => match command {
                    Some(command) => self.apply(command).await?,
                    None => {
                        mailbox_open = false;
                        if !self.all_finalized() {
                            return Err(QueryError::Cancelled);
                        }
                    }
                },
                Some(()) = overflow.recv() => return Err(QueryError::Overloaded),
                _ = self.output.closed() => return Err(QueryError::Cancelled),
            }
        }
    }

    async fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Response { peer, response } => self.on_response(peer, response),
            Command::Propagation { peer, propagate } => self.on_propagation(peer, propagate).await,
        }
    }

    /// The single decision routine, run after every event.
    fn recompute(&mut self) -> QueryState {
        let all_finalized = self.all_finalized();

        if all_finalized && self.ledger.is_empty() && self.sub_queries.is_empty() {
            self.state = QueryState::Closed;
            self.publish();
            return self.state;
        }

        if let Some(bound) = self.safe_bound() {
            if let (Some(from), Some(to)) =
                (self.ledger.ready_from(), self.ledger.ready_to_at_most(bound))
            {
                debug!(
                    request_id = %self.request.request_id,
                    from = %from,
                    to = %to,
                    "range ready"
                );
                self.sub_queries.push_back(self.request.sub_range(from, to));
                self.ledger.shrink(to);
            }
        }

        self.state = if all_finalized {
            QueryState::Draining
        } else {
            QueryState::Active
        };
        self.publish();
        self.state
    }

    fn all_finalized(&self) -> bool {
        self.primary.finalized && self.peers.values().all(|s| s.finalized)
    }

    /// Highest ref that no unfinalized peer can still report below.
    ///
    /// Peers report in ascending order, so anything at or below the lowest
    /// watermark among unfinalized peers is settled. A peer that has not
    /// reported yet blocks everything.
    fn safe_bound(&self) -> Option<MessageRef> {
        let mut bound = MessageRef::MAX;
        for source in self.peers.values().filter(|s| !s.finalized) {
            bound = bound.min(source.watermark?);
        }
        Some(bound)
    }

    fn on_local_record(&mut self, record: &Record) {
        let r = record.message_ref();
        self.ledger.push(r, true);
        self.primary.watermark = max_ref(self.primary.watermark, Some(r));
        if let Some(chunker) = self.chunker.as_mut() {
            chunker.push(r);
        }
    }

    fn on_local_end(&mut self) {
        self.primary.finalized = true;
        if let Some(chunker) = self.chunker.take() {
            chunker.finish();
        }
        debug!(request_id = %self.request.request_id, "local query finished");
    }

    fn on_response(&mut self, peer: NodeId, response: QueryResponse) -> Result<()> {
        if !self.peers.contains_key(&peer) {
            debug!(request_id = %self.request.request_id, peer = %peer, "registered peer");
        }
        let source = self.peers.entry(peer).or_default();

        if source.finalized {
            let violation = if response.is_final {
                ProtocolViolation::FinalizedTwice { peer }
            } else {
                ProtocolViolation::EventAfterFinal { peer }
            };
            return Err(violation.into());
        }

        source.watermark = max_ref(source.watermark, response.refs.iter().max().copied());
        source.finalized = response.is_final;

        for r in &response.refs {
            self.ledger.push(*r, false);
        }
        Ok(())
    }

    async fn on_propagation(&mut self, peer: NodeId, propagate: QueryPropagate) -> Result<()> {
        trace!(
            request_id = %self.request.request_id,
            peer = %peer,
            records = propagate.payload.len(),
            "propagation received"
        );
        for record in propagate.payload {
            self.storage.store(&record).await?;
            self.ledger.push(record.message_ref(), true);
        }
        Ok(())
    }

    async fn forward(&mut self, record: Record) -> Result<()> {
        let r = record.message_ref();
        if self.last_emitted.is_some_and(|last| r <= last) {
            trace!(request_id = %self.request.request_id, r = %r, "skipping already emitted ref");
            return Ok(());
        }
        self.output
            .send(Ok(record))
            .await
            .map_err(|_| QueryError::Cancelled)?;
        self.last_emitted = Some(r);
        self.emitted += 1;
        Ok(())
    }

    fn publish(&self) {
        self.status.send_replace(AggregatorStatus {
            state: self.state,
            primary: self.primary,
            peers: self.peers.iter().map(|(id, s)| (*id, *s)).collect(),
            in_flight: self.sub_queries.len(),
            emitted: self.emitted,
        });
    }
}

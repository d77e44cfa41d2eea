//! The Propagator: serves one query for one requester.
//!
//! Runs this node's local query, reports every local ref back to the
//! requester, and pushes the records the requester turns out to be missing.
//! What is missing is decided by a [`PropagationList`] fed from both sides.

use std::collections::VecDeque;
use std::sync::Arc;

use logquery_core::{
    validate_refs, validate_request, ChunkCallback, Chunker, MessageRef, PropagationList,
    QueryRequest, Record,
};
use logquery_store::{RecordStream, Store, StoreExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::aggregator::{check_request_id, next_record};
use crate::config::QueryConfig;
use crate::error::{ProtocolViolation, QueryError, Result};
use crate::messages::{NodeId, QueryResponse};

/// Invoked once when a Propagator finishes: `Ok` after the last propagation
/// batch, `Err` when the query failed. Not invoked on cancellation.
pub type CloseCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Handle to a running Propagator.
#[derive(Clone)]
pub struct Propagator {
    request: Arc<QueryRequest>,
    requester: NodeId,
    mailbox: mpsc::Sender<QueryResponse>,
    overflow: mpsc::Sender<()>,
    abort: AbortHandle,
}

impl Propagator {
    /// Start serving `request` for `requester`.
    ///
    /// `response_callback` receives this node's local refs in batches, the
    /// last with `is_final = true`. `propagation_callback` receives the
    /// records the requester lacks; its final call may carry an empty batch.
    pub fn spawn<S: Store>(
        storage: Arc<S>,
        request: QueryRequest,
        requester: NodeId,
        response_callback: ChunkCallback<MessageRef>,
        propagation_callback: ChunkCallback<Record>,
        close_callback: CloseCallback,
        config: &QueryConfig,
    ) -> Result<Self> {
        validate_request(&request)?;

        let request = Arc::new(request);
        let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity.max(1));
        let (overflow_tx, overflow_rx) = mpsc::channel(1);

        let task = PropagatorTask {
            storage,
            request: request.clone(),
            requester,
            ledger: PropagationList::new(),
            response_chunker: Some(Chunker::new(response_callback, config.chunker)),
            propagation_chunker: Some(Chunker::new(propagation_callback, config.chunker)),
            lookups: VecDeque::new(),
            active: None,
            propagated: 0,
        };

        debug!(
            request_id = %request.request_id,
            requester = %requester,
            "propagator started"
        );
        let handle = tokio::spawn(task.run(mailbox_rx, overflow_rx, close_callback));

        Ok(Self {
            request,
            requester,
            mailbox: mailbox_tx,
            overflow: overflow_tx,
            abort: handle.abort_handle(),
        })
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    pub fn requester(&self) -> NodeId {
        self.requester
    }

    /// Feed what the requester already holds.
    pub async fn on_requester_response(&self, response: QueryResponse) -> Result<()> {
        check_request_id(&self.request.request_id, &response.request_id)?;
        validate_refs(&self.request, &response.refs)?;
        self.mailbox
            .send(response)
            .await
            .map_err(|_| QueryError::Closed)
    }

    /// Like [`on_requester_response`](Self::on_requester_response), but a
    /// full mailbox fails this query with [`QueryError::Overloaded`]
    /// instead of waiting.
    pub fn try_requester_response(&self, response: QueryResponse) -> Result<()> {
        check_request_id(&self.request.request_id, &response.request_id)?;
        validate_refs(&self.request, &response.refs)?;
        match self.mailbox.try_send(response) {
            Ok(()) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(QueryError::Closed),
            Err(TrySendError::Full(_)) => {
                warn!(
                    request_id = %self.request.request_id,
                    requester = %self.requester,
                    "mailbox full, failing propagation"
                );
                let _ = self.overflow.try_send(());
                Err(QueryError::Overloaded)
            }
        }
    }

    /// Stop serving immediately. No further callbacks run.
    pub fn cancel(&self) {
        debug!(request_id = %self.request.request_id, "propagator cancelled");
        self.abort.abort();
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

struct PropagatorTask<S> {
    storage: Arc<S>,
    request: Arc<QueryRequest>,
    requester: NodeId,
    ledger: PropagationList,
    response_chunker: Option<Chunker<MessageRef>>,
    propagation_chunker: Option<Chunker<Record>>,
    /// Batches of missing refs awaiting a payload lookup, oldest first.
    lookups: VecDeque<Vec<MessageRef>>,
    active: Option<RecordStream>,
    propagated: usize,
}

impl<S: Store> PropagatorTask<S> {
    async fn run(
        mut self,
        mut mailbox: mpsc::Receiver<QueryResponse>,
        mut overflow: mpsc::Receiver<()>,
        close: CloseCallback,
    ) {
        let mut result = self.drive(&mut mailbox, &mut overflow).await;

        // The requester is finalized once we finish, so anything it sent
        // meanwhile is a violation.
        mailbox.close();
        while let Ok(response) = mailbox.try_recv() {
            if result.is_ok() {
                result = self.on_requester_response(response);
            }
        }

        match result {
            Ok(()) => {
                debug!(
                    request_id = %self.request.request_id,
                    requester = %self.requester,
                    propagated = self.propagated,
                    "propagator closed"
                );
                close(Ok(()));
            }
            Err(QueryError::Cancelled) => debug!(
                request_id = %self.request.request_id,
                requester = %self.requester,
                "propagator abandoned"
            ),
            Err(err) => {
                warn!(
                    request_id = %self.request.request_id,
                    requester = %self.requester,
                    error = %err,
                    "propagation failed"
                );
                close(Err(err));
            }
        }
    }

    async fn drive(
        &mut self,
        mailbox: &mut mpsc::Receiver<QueryResponse>,
        overflow: &mut mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut local = Some(self.storage.open_query(&self.request).await?);
        let mut mailbox_open = true;

        loop {
            let missing = self.ledger.take_decidable();
            if !missing.is_empty() {
                trace!(
                    request_id = %self.request.request_id,
                    refs = missing.len(),
                    "requester is missing refs"
                );
                self.lookups.push_back(missing);
            }

            if self.ledger.is_finalized() && self.lookups.is_empty() {
                if let Some(chunker) = self.propagation_chunker.take() {
                    chunker.finish();
                }
                return Ok(());
            }

            if self.active.is_none() {
                if let Some(refs) = self.lookups.front() {
                    self.active = Some(
                        self.storage
                            .query_by_refs(&self.request.stream_id, self.request.partition, refs)
                            .await?,
                    );
                }
            }

            if !mailbox_open && local.is_none() && self.active.is_none() {
                return Err(QueryError::Cancelled);
            }

            tokio::select! {
                item = next_record(local.as_mut()) => match item {
                    Some(Ok(record)) => self.on_local_record(&record)?,
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        local = None;
                        self.on_local_end()?;
                    }
                },
                item = next_record(self.active.as_mut()) => match item {
                    Some(Ok(record)) => self.propagate(record),
                    Some(Err(err)) => return Err(err.into()),
                    None => {
                        self.active = None;
                        self.lookups.pop_front();
                    }
                },
                response = mailbox.recv(), if mailbox_open => match response {
                    Some(response) => self.on_requester_response(response)?,
                    None => {
                        mailbox_open = false;
                        if !self.ledger.is_requester_finalized() {
                            return Err(QueryError::Cancelled);
                        }
                    }
                },
                Some(()) = overflow.recv() => return Err(QueryError::Overloaded),
            }
        }
    }

    fn on_local_record(&mut self, record: &Record) -> Result<()> {
        let r = record.message_ref();
        self.ledger
            .push_local_ref(r)
            .map_err(ProtocolViolation::from)?;
        if let Some(chunker) = self.response_chunker.as_mut() {
            chunker.push(r);
        }
        Ok(())
    }

    fn on_local_end(&mut self) -> Result<()> {
        self.ledger.finalize_local().map_err(ProtocolViolation::from)?;
        if let Some(chunker) = self.response_chunker.take() {
            chunker.finish();
        }
        debug!(request_id = %self.request.request_id, "local query finished");
        Ok(())
    }

    fn on_requester_response(&mut self, response: QueryResponse) -> Result<()> {
        if self.ledger.is_requester_finalized() {
            let peer = self.requester;
            let violation = if response.is_final {
                ProtocolViolation::FinalizedTwice { peer }
            } else {
                ProtocolViolation::EventAfterFinal { peer }
            };
            return Err(violation.into());
        }

        for r in &response.refs {
            self.ledger
                .push_requester_ref(*r)
                .map_err(ProtocolViolation::from)?;
        }
        if response.is_final {
            self.ledger
                .finalize_requester()
                .map_err(ProtocolViolation::from)?;
        }
        Ok(())
    }

    fn propagate(&mut self, record: Record) {
        if let Some(chunker) = self.propagation_chunker.as_mut() {
            chunker.push(record);
            self.propagated += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logquery_core::{ChunkerConfig, MessageId, QueryOptions, RequestId, StreamId};
    use logquery_store::MemoryStore;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    fn record(ts: i64) -> Record {
        Record::new(
            MessageId {
                stream_id: StreamId::new("stream"),
                partition: 0,
                timestamp: ts,
                sequence_number: 0,
                publisher_id: "pub".into(),
                msg_chain_id: "chain".into(),
            },
            vec![ts as u8],
        )
    }

    fn request() -> QueryRequest {
        QueryRequest {
            request_id: RequestId::new("req-1"),
            consumer_id: "consumer".into(),
            stream_id: StreamId::new("stream"),
            partition: 0,
            options: QueryOptions::Range {
                from: MessageRef::new(0, 0),
                to: MessageRef::new(100, 0),
                publisher_id: None,
                msg_chain_id: None,
            },
        }
    }

    fn response(refs: &[i64], is_final: bool) -> QueryResponse {
        QueryResponse::new(
            RequestId::new("req-1"),
            refs.iter().map(|ts| MessageRef::new(*ts, 0)).collect(),
            is_final,
        )
    }

    type Calls<T> = Arc<Mutex<Vec<(Vec<T>, bool)>>>;

    struct Harness {
        propagator: Propagator,
        responses: Calls<MessageRef>,
        propagations: mpsc::UnboundedReceiver<(Vec<i64>, bool)>,
        closed: oneshot::Receiver<Result<()>>,
    }

    fn spawn(records: Vec<Record>, config: QueryConfig) -> Harness {
        let store = Arc::new(MemoryStore::with_records(records).unwrap());
        let responses: Calls<MessageRef> = Arc::default();
        let response_sink = responses.clone();
        let (propagation_tx, propagations) = mpsc::unbounded_channel();
        let (close_tx, closed) = oneshot::channel();

        let propagator = Propagator::spawn(
            store,
            request(),
            NodeId::from_bytes([7; 32]),
            Box::new(move |refs, is_final| response_sink.lock().unwrap().push((refs, is_final))),
            Box::new(move |records: Vec<Record>, is_final| {
                let ts = records.iter().map(|r| r.id.timestamp).collect();
                let _ = propagation_tx.send((ts, is_final));
            }),
            Box::new(move |result| {
                let _ = close_tx.send(result);
            }),
            &config,
        )
        .unwrap();

        Harness {
            propagator,
            responses,
            propagations,
            closed,
        }
    }

    #[tokio::test]
    async fn test_propagates_only_missing_records() {
        let mut h = spawn(vec![record(1), record(2), record(3)], QueryConfig::default());

        h.propagator
            .on_requester_response(response(&[2], true))
            .await
            .unwrap();

        assert!(h.closed.await.unwrap().is_ok());
        assert_eq!(h.propagations.recv().await, Some((vec![1, 3], true)));
        assert_eq!(
            *h.responses.lock().unwrap(),
            vec![(
                vec![MessageRef::new(1, 0), MessageRef::new(2, 0), MessageRef::new(3, 0)],
                true
            )]
        );
        assert!(h.propagator.is_closed());
    }

    #[tokio::test]
    async fn test_propagates_before_requester_finalizes() {
        let config = QueryConfig {
            chunker: ChunkerConfig {
                items_limit: 1,
                bytes_limit: usize::MAX,
            },
            ..QueryConfig::default()
        };
        let mut h = spawn(vec![record(1), record(2), record(3)], config);

        // The requester's low-water mark of 2 settles that it lacks 1.
        h.propagator
            .on_requester_response(response(&[2], false))
            .await
            .unwrap();
        assert_eq!(h.propagations.recv().await, Some((vec![1], false)));

        h.propagator
            .on_requester_response(response(&[], true))
            .await
            .unwrap();
        assert_eq!(h.propagations.recv().await, Some((vec![3], false)));
        assert_eq!(h.propagations.recv().await, Some((vec![], true)));
        assert!(h.closed.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_nothing_missing_still_finishes() {
        let mut h = spawn(vec![record(1)], QueryConfig::default());

        h.propagator
            .on_requester_response(response(&[1, 5], true))
            .await
            .unwrap();

        assert!(h.closed.await.unwrap().is_ok());
        assert_eq!(h.propagations.recv().await, Some((vec![], true)));
    }

    #[tokio::test]
    async fn test_cancel_skips_close_callback() {
        let h = spawn(vec![record(1)], QueryConfig::default());

        h.propagator.cancel();

        assert!(h.closed.await.is_err());
        assert!(h.propagator.is_closed());
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_refs() {
        let h = spawn(vec![], QueryConfig::default());

        let err = h
            .propagator
            .on_requester_response(response(&[101], false))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Malformed(_)));
    }
}

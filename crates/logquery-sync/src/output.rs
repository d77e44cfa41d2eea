//! The requester-facing side of a query: its record sequence and status.

use logquery_core::{MessageRef, Record};
use tokio::sync::mpsc;

use crate::error::{QueryError, Result};
use crate::messages::NodeId;

/// Lifecycle of an Aggregator or Propagator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Sources are still reporting.
    Active,
    /// Every source is finalized; the last ranges are still streaming.
    Draining,
    /// Terminal. No further events are accepted.
    Closed,
}

/// What is known about one source of a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceState {
    /// The source will report nothing more.
    pub finalized: bool,
    /// Highest ref the source has reported.
    pub watermark: Option<MessageRef>,
}

/// Snapshot of an Aggregator, refreshed after every recompute.
///
/// Exposes every known source and whether it finalized, so a watchdog can
/// act on peers that stall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorStatus {
    pub state: QueryState,
    pub primary: SourceState,
    pub peers: Vec<(NodeId, SourceState)>,
    /// Sub-queries issued and not yet drained.
    pub in_flight: usize,
    /// Records delivered to the output so far.
    pub emitted: usize,
}

impl AggregatorStatus {
    pub(crate) fn new(peers: &[NodeId]) -> Self {
        Self {
            state: QueryState::Active,
            primary: SourceState::default(),
            peers: peers.iter().map(|p| (*p, SourceState::default())).collect(),
            in_flight: 0,
            emitted: 0,
        }
    }

    /// Peers that have not finalized yet.
    pub fn pending_peers(&self) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|(_, s)| !s.finalized)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// The merged, ordered record sequence of one query.
///
/// Ends with `None`. A failed query yields one `Err` before the end; a
/// cancelled query just ends.
#[derive(Debug)]
pub struct QueryOutput {
    rx: mpsc::Receiver<Result<Record>>,
}

impl QueryOutput {
    pub(crate) fn new(rx: mpsc::Receiver<Result<Record>>) -> Self {
        Self { rx }
    }

    /// Next record, or `None` once the query ended.
    pub async fn next(&mut self) -> Option<Result<Record>> {
        self.rx.recv().await
    }

    /// Drain the whole sequence, stopping at the first error.
    pub async fn collect(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        while let Some(item) = self.next().await {
            records.push(item?);
        }
        Ok(records)
    }
}

impl From<mpsc::Receiver<Result<Record>>> for QueryOutput {
    fn from(rx: mpsc::Receiver<Result<Record>>) -> Self {
        Self::new(rx)
    }
}

/// Sender half used by the Aggregator task.
pub(crate) type OutputSender = mpsc::Sender<std::result::Result<Record, QueryError>>;

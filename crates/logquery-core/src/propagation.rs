//! The diff ledger.
//!
//! Merges two ascending ref sequences for one query, what the requester
//! already has and what this node has locally, and yields the local refs
//! the requester is missing as soon as they fall at or below the
//! requester's low-water mark.

use std::collections::VecDeque;

use crate::error::LedgerError;
use crate::types::MessageRef;

/// Diff ledger for one (query, requester) pair.
#[derive(Debug, Default, Clone)]
pub struct PropagationList {
    requester: VecDeque<MessageRef>,
    local: VecDeque<MessageRef>,
    latest_requester: Option<MessageRef>,
    requester_finalized: bool,
    local_finalized: bool,
}

impl PropagationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the requester has `r`.
    ///
    /// Cancels a matching local candidate, or remembers `r` so that a later
    /// local push can be cancelled instead.
    pub fn push_requester_ref(&mut self, r: MessageRef) -> Result<(), LedgerError> {
        if self.requester_finalized {
            return Err(LedgerError::RequesterFinalized);
        }
        self.latest_requester = Some(self.latest_requester.map_or(r, |cur| cur.max(r)));

        match self.local.binary_search(&r) {
            Ok(idx) => {
                self.local.remove(idx);
            }
            Err(_) => {
                if let Err(idx) = self.requester.binary_search(&r) {
                    self.requester.insert(idx, r);
                }
            }
        }
        Ok(())
    }

    /// Record that this node has `r` locally.
    ///
    /// A match against the requester consumes it and every older requester
    /// entry; both sequences ascend, so those can never match again.
    pub fn push_local_ref(&mut self, r: MessageRef) -> Result<(), LedgerError> {
        if self.local_finalized {
            return Err(LedgerError::LocalFinalized);
        }
        match self.requester.binary_search(&r) {
            Ok(idx) => {
                self.requester.drain(..=idx);
            }
            Err(idx) => {
                self.requester.drain(..idx);
                if self.local.back().map_or(true, |last| *last < r) {
                    self.local.push_back(r);
                } else if let Err(pos) = self.local.binary_search(&r) {
                    self.local.insert(pos, r);
                }
            }
        }
        Ok(())
    }

    /// The requester will report nothing more. One-shot.
    pub fn finalize_requester(&mut self) -> Result<(), LedgerError> {
        if self.requester_finalized {
            return Err(LedgerError::RequesterFinalized);
        }
        self.requester_finalized = true;
        Ok(())
    }

    /// The local query is exhausted. One-shot.
    pub fn finalize_local(&mut self) -> Result<(), LedgerError> {
        if self.local_finalized {
            return Err(LedgerError::LocalFinalized);
        }
        self.local_finalized = true;
        Ok(())
    }

    /// Remove and return every local ref that is now known to be missing at
    /// the requester, ascending.
    pub fn take_decidable(&mut self) -> Vec<MessageRef> {
        if self.requester_finalized {
            return self.local.drain(..).collect();
        }
        match self.latest_requester {
            Some(mark) => {
                let end = self.local.partition_point(|r| *r <= mark);
                self.local.drain(..end).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn is_requester_finalized(&self) -> bool {
        self.requester_finalized
    }

    pub fn is_local_finalized(&self) -> bool {
        self.local_finalized
    }

    /// Both sides finalized.
    pub fn is_finalized(&self) -> bool {
        self.requester_finalized && self.local_finalized
    }
}

//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use logquery_core::MessageRef;

/// A ref from a small space, so that generated sets overlap often.
pub fn message_ref() -> impl Strategy<Value = MessageRef> {
    (0i64..200, 0u32..4).prop_map(|(ts, seq)| MessageRef::new(ts, seq))
}

/// A set of up to `max` refs.
pub fn ref_set(max: usize) -> impl Strategy<Value = BTreeSet<MessageRef>> {
    prop::collection::btree_set(message_ref(), 0..=max)
}

/// An arbitrary sequence of refs, with repeats, in no particular order.
pub fn ref_events(max: usize) -> impl Strategy<Value = Vec<MessageRef>> {
    prop::collection::vec(message_ref(), 0..=max)
}

/// Payload bytes of up to `max_len`.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// One multi-node query: what the requester holds, what each peer holds,
/// and how the peers batch their reports.
#[derive(Debug, Clone)]
pub struct ReconciliationCase {
    pub primary: BTreeSet<MessageRef>,
    pub peers: Vec<BTreeSet<MessageRef>>,
    /// Refs per response batch.
    pub batch_size: usize,
    /// Seed for interleaving the peers' messages.
    pub interleave_seed: u64,
}

impl ReconciliationCase {
    /// Every ref any node holds, ascending.
    pub fn union(&self) -> Vec<MessageRef> {
        let mut all = self.primary.clone();
        for peer in &self.peers {
            all.extend(peer.iter().copied());
        }
        all.into_iter().collect()
    }

    /// Refs `peer` holds that the requester does not.
    pub fn missing_from_primary(&self, peer: usize) -> Vec<MessageRef> {
        self.peers[peer]
            .difference(&self.primary)
            .copied()
            .collect()
    }

    /// The batches `peer` reports, the last one final.
    pub fn batches(&self, peer: usize) -> Vec<Vec<MessageRef>> {
        let refs: Vec<MessageRef> = self.peers[peer].iter().copied().collect();
        let mut batches: Vec<Vec<MessageRef>> = refs
            .chunks(self.batch_size.max(1))
            .map(<[MessageRef]>::to_vec)
            .collect();
        if batches.is_empty() {
            batches.push(Vec::new());
        }
        batches
    }
}

/// A case with up to `max_peers` peers holding up to `max_refs` refs each.
pub fn reconciliation_case(
    max_peers: usize,
    max_refs: usize,
) -> impl Strategy<Value = ReconciliationCase> {
    (
        ref_set(max_refs),
        prop::collection::vec(ref_set(max_refs), 0..=max_peers),
        1usize..=4,
        any::<u64>(),
    )
        .prop_map(|(primary, peers, batch_size, interleave_seed)| ReconciliationCase {
            primary,
            peers,
            batch_size,
            interleave_seed,
        })
}

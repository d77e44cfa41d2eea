//! The readiness ledger.
//!
//! Tracks every ref seen for one query together with a flag saying whether
//! this node can produce the payload right now. The ready range is the
//! longest prefix of consecutive confirmed entries.

use std::collections::BTreeMap;

use crate::types::MessageRef;

/// Readiness ledger for one query.
#[derive(Debug, Default, Clone)]
pub struct AggregationList {
    entries: BTreeMap<MessageRef, bool>,
    threshold: Option<MessageRef>,
}

impl AggregationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `r`. A ref at or below the threshold is ignored; an already
    /// tracked ref only ever moves from unconfirmed to confirmed.
    pub fn push(&mut self, r: MessageRef, confirmed: bool) {
        if self.threshold.is_some_and(|t| r <= t) {
            return;
        }
        let flag = self.entries.entry(r).or_insert(false);
        *flag |= confirmed;
    }

    /// Start of the ready prefix.
    pub fn ready_from(&self) -> Option<MessageRef> {
        match self.entries.first_key_value() {
            Some((r, true)) => Some(*r),
            _ => None,
        }
    }

    /// End of the ready prefix.
    pub fn ready_to(&self) -> Option<MessageRef> {
        self.entries
            .iter()
            .take_while(|(_, confirmed)| **confirmed)
            .last()
            .map(|(r, _)| *r)
    }

    /// Both ends of the ready prefix, if it is non-empty.
    pub fn ready_range(&self) -> Option<(MessageRef, MessageRef)> {
        Some((self.ready_from()?, self.ready_to()?))
    }

    /// Last confirmed ref of the ready prefix that is `<= bound`.
    pub fn ready_to_at_most(&self, bound: MessageRef) -> Option<MessageRef> {
        self.entries
            .iter()
            .take_while(|(r, confirmed)| **confirmed && **r <= bound)
            .last()
            .map(|(r, _)| *r)
    }

    /// Drop every entry `<= t` and raise the threshold to `max(threshold, t)`.
    /// A lower `t` leaves the threshold unchanged.
    pub fn shrink(&mut self, t: MessageRef) {
        while let Some(entry) = self.entries.first_entry() {
            if *entry.key() > t {
                break;
            }
            entry.remove();
        }
        self.threshold = Some(self.threshold.map_or(t, |cur| cur.max(t)));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Highest ref ever used to trim this ledger.
    pub fn threshold(&self) -> Option<MessageRef> {
        self.threshold
    }

    /// Whether `r` is tracked and confirmed.
    pub fn is_confirmed(&self, r: &MessageRef) -> bool {
        self.entries.get(r).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn r(ts: i64) -> MessageRef {
        MessageRef::new(ts, 0)
    }

    #[test]
    fn test_empty_has_no_ready_range() {
        let list = AggregationList::new();
        assert!(list.is_empty());
        assert_eq!(list.ready_from(), None);
        assert_eq!(list.ready_to(), None);
    }

    #[test]
    fn test_unconfirmed_head_blocks_prefix() {
        let mut list = AggregationList::new();
        list.push(r(1), false);
        list.push(r(2), true);

        assert_eq!(list.ready_range(), None);

        list.push(r(1), true);
        assert_eq!(list.ready_range(), Some((r(1), r(2))));
    }

    #[test]
    fn test_gap_terminates_prefix() {
        let mut list = AggregationList::new();
        list.push(r(1), true);
        list.push(r(2), true);
        list.push(r(3), false);
        list.push(r(4), true);

        assert_eq!(list.ready_range(), Some((r(1), r(2))));
        assert_eq!(list.ready_to_at_most(r(1)), Some(r(1)));
    }

    #[test]
    fn test_confirmed_never_reverts() {
        let mut list = AggregationList::new();
        list.push(r(1), true);
        list.push(r(1), false);
        assert!(list.is_confirmed(&r(1)));
    }

    #[test]
    fn test_shrink_ignores_late_refs() {
        let mut list = AggregationList::new();
        list.push(r(1), true);
        list.push(r(2), true);
        list.push(r(3), false);
        list.shrink(r(2));

        assert_eq!(list.len(), 1);
        assert_eq!(list.threshold(), Some(r(2)));

        list.push(r(1), true);
        list.push(r(2), false);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_shrink_never_lowers_threshold() {
        let mut list = AggregationList::new();
        list.shrink(r(5));
        list.shrink(r(3));
        assert_eq!(list.threshold(), Some(r(5)));
    }

    proptest! {
        #[test]
        fn prop_push_is_idempotent(
            refs in proptest::collection::vec((0i64..50, any::<bool>()), 0..40),
        ) {
            let mut once = AggregationList::new();
            let mut twice = AggregationList::new();
            for (ts, flag) in &refs {
                once.push(r(*ts), *flag);
                twice.push(r(*ts), *flag);
                twice.push(r(*ts), *flag);
            }
            prop_assert_eq!(once.entries, twice.entries);
        }

        #[test]
        fn prop_threshold_is_monotone(cuts in proptest::collection::vec(0i64..100, 1..20)) {
            let mut list = AggregationList::new();
            let mut prev = None;
            for cut in cuts {
                list.shrink(r(cut));
                let now = list.threshold();
                prop_assert!(now >= prev);
                prev = now;
            }
        }

        #[test]
        fn prop_ready_prefix_is_confirmed_and_contiguous(
            refs in proptest::collection::vec((0i64..30, any::<bool>()), 0..40),
        ) {
            let mut list = AggregationList::new();
            for (ts, flag) in &refs {
                list.push(r(*ts), *flag);
            }
            if let Some((from, to)) = list.ready_range() {
                prop_assert!(from <= to);
                for (k, v) in list.entries.range(from..=to) {
                    prop_assert!(*v, "unconfirmed {} inside ready range", k);
                }
                let after = list.entries.range(to..).nth(1);
                prop_assert!(after.map_or(true, |(_, v)| !*v));
            }
        }
    }
}

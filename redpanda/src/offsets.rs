//! Offset bookkeeping for out-of-order settlement.
//!
//! Kafka commits a single position per partition: everything below it is
//! considered done. Deliveries are settled concurrently and in any order, so
//! the committable position is the lowest offset still awaiting settlement,
//! or one past the highest settled offset once nothing is pending.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct PartitionOffsets {
    pending: BTreeSet<i64>,
    highest_settled: Option<i64>,
    committed: Option<i64>,
}

impl PartitionOffsets {
    fn committable(&self) -> Option<i64> {
        match self.pending.first() {
            Some(&lowest_pending) => Some(lowest_pending),
            None => self.highest_settled.map(|offset| offset + 1),
        }
    }
}

/// Tracks received and settled offsets per topic partition.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `offset` was handed out and awaits settlement.
    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .pending
            .insert(offset);
    }

    /// Record that `offset` was settled.
    ///
    /// Returns the position to commit when the committable position moved
    /// forward, `None` otherwise.
    pub fn settle(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let offsets = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if !offsets.pending.remove(&offset) {
            return None;
        }
        offsets.highest_settled = Some(offsets.highest_settled.map_or(offset, |h| h.max(offset)));

        let next = offsets.committable()?;
        if offsets.committed.is_some_and(|committed| committed >= next) {
            return None;
        }
        offsets.committed = Some(next);
        Some(next)
    }

    /// Offsets awaiting settlement on a partition.
    #[must_use]
    pub fn pending(&self, topic: &str, partition: i32) -> usize {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, |offsets| offsets.pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TOPIC: &str = "market_requests";

    #[test]
    fn in_order_settlement_commits_each_offset() {
        let mut tracker = OffsetTracker::new();
        tracker.track(TOPIC, 0, 10);
        tracker.track(TOPIC, 0, 11);

        assert_eq!(tracker.settle(TOPIC, 0, 10), Some(11));
        assert_eq!(tracker.settle(TOPIC, 0, 11), Some(12));
    }

    #[test]
    fn out_of_order_settlement_waits_for_the_gap() {
        let mut tracker = OffsetTracker::new();
        for offset in 5..=7 {
            tracker.track(TOPIC, 0, offset);
        }

        assert_eq!(tracker.settle(TOPIC, 0, 7), None);
        assert_eq!(tracker.settle(TOPIC, 0, 6), None);
        assert_eq!(tracker.settle(TOPIC, 0, 5), Some(8));
        assert_eq!(tracker.pending(TOPIC, 0), 0);
    }

    #[test]
    fn partitions_are_independent() {
        let mut tracker = OffsetTracker::new();
        tracker.track(TOPIC, 0, 1);
        tracker.track(TOPIC, 1, 1);

        assert_eq!(tracker.settle(TOPIC, 1, 1), Some(2));
        assert_eq!(tracker.pending(TOPIC, 0), 1);
    }

    #[test]
    fn unknown_or_repeated_settlement_is_ignored() {
        let mut tracker = OffsetTracker::new();
        assert_eq!(tracker.settle(TOPIC, 0, 3), None);

        tracker.track(TOPIC, 0, 3);
        assert_eq!(tracker.settle(TOPIC, 0, 3), Some(4));
        assert_eq!(tracker.settle(TOPIC, 0, 3), None);
    }

    proptest! {
        #[test]
        fn never_commits_past_an_unsettled_offset(
            order in Just((0i64..20).collect::<Vec<_>>()).prop_shuffle(),
        ) {
            let mut tracker = OffsetTracker::new();
            for offset in 0..20 {
                tracker.track(TOPIC, 0, offset);
            }

            let mut settled = BTreeSet::new();
            let mut last_commit = None;
            for offset in order {
                settled.insert(offset);
                if let Some(next) = tracker.settle(TOPIC, 0, offset) {
                    prop_assert!((0..next).all(|o| settled.contains(&o)));
                    prop_assert!(last_commit.is_none_or(|last| next > last));
                    last_commit = Some(next);
                }
            }
            prop_assert_eq!(last_commit, Some(20));
        }
    }
}

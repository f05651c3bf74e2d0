//! Per-priority FIFO buckets with round-robin passes and starvation promotion.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::task::Priority;

pub(crate) struct Entry<T> {
    pub(crate) item: T,
    pub(crate) priority: Priority,
    pub(crate) enqueued_at: Instant,
    /// Restarted on every promotion.
    waiting_since: Instant,
}

pub(crate) struct PriorityQueues<T> {
    buckets: BTreeMap<Priority, VecDeque<Entry<T>>>,
}

impl<T> PriorityQueues<T> {
    pub(crate) fn new() -> Self {
        Self {
            buckets: BTreeMap::new(),
        }
    }

    pub(crate) fn push(&mut self, item: T, priority: Priority, now: Instant) {
        self.insert(Entry {
            item,
            priority,
            enqueued_at: now,
            waiting_since: now,
        });
    }

    /// Keeps each bucket ordered by original enqueue time.
    fn insert(&mut self, entry: Entry<T>) {
        let bucket = self.buckets.entry(entry.priority).or_default();
        let at = bucket.partition_point(|e| e.enqueued_at <= entry.enqueued_at);
        bucket.insert(at, entry);
    }

    /// Move every entry that waited longer than `threshold` one step up.
    /// Returns how many entries moved.
    pub(crate) fn promote_starved(&mut self, now: Instant, threshold: Duration) -> usize {
        let mut starved = Vec::new();
        for (priority, bucket) in self.buckets.iter_mut() {
            if *priority == Priority::HIGHEST {
                continue;
            }
            let mut kept = VecDeque::with_capacity(bucket.len());
            for entry in bucket.drain(..) {
                if now.saturating_duration_since(entry.waiting_since) > threshold {
                    starved.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            *bucket = kept;
        }
        let promoted = starved.len();
        for mut entry in starved {
            entry.priority = entry.priority.promoted();
            entry.waiting_since = now;
            self.insert(entry);
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        promoted
    }

    /// Pop the head of every non-empty bucket, most urgent first.
    pub(crate) fn next_pass(&mut self) -> Vec<Entry<T>> {
        let pass: Vec<Entry<T>> = self
            .buckets
            .values_mut()
            .filter_map(|bucket| bucket.pop_front())
            .collect();
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        pass
    }

    pub(crate) fn drain_all(&mut self) -> Vec<Entry<T>> {
        std::mem::take(&mut self.buckets)
            .into_values()
            .flatten()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

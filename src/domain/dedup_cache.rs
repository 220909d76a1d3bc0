//! Bounded set of previously seen transaction identifiers.

use std::collections::{HashSet, VecDeque};

/// Insertion-ordered set of transaction ids with oldest-first eviction.
///
/// A `capacity` of `0` disables eviction and lets the set grow without
/// bound while connected.
#[derive(Debug, Default)]
pub struct DedupCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupCache {
    /// Creates an empty cache holding at most `capacity` ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Records `tx` as seen.
    ///
    /// Returns `false` if `tx` was already present (a duplicate).
    pub fn insert(&mut self, tx: &str) -> bool {
        if self.seen.contains(tx) {
            return false;
        }
        if self.capacity > 0 && self.order.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(tx.to_string());
        self.order.push_back(tx.to_string());
        true
    }

    /// Forgets every id.
    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    /// Returns the number of ids currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no ids are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

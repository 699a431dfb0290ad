//! Concurrent dedup table over visit keys.

use dashmap::DashSet;
use std::hash::Hash;

/// Set of visit keys already expanded.
///
/// Keys are stored whole rather than fingerprinted: a hash collision here
/// would silently prune a reachable linearization and turn a correct
/// system into a reported counterexample, which is the one mistake a
/// checker cannot afford. Insertion races between workers are benign —
/// the loser re-expands a subtree at most once.
pub struct Visited<K: Eq + Hash> {
    keys: DashSet<K, ahash::RandomState>,
}

impl<K: Eq + Hash> Visited<K> {
    pub fn new() -> Self {
        Self {
            keys: DashSet::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Record a key. Returns true if it was new.
    #[inline]
    pub fn insert(&self, key: K) -> bool {
        self.keys.insert(key)
    }

    /// True if the key has been recorded.
    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    /// Distinct keys recorded so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Eq + Hash> Default for Visited<K> {
    fn default() -> Self {
        Self::new()
    }
}

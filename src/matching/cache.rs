//! Bounded memo of recent query results
//!
//! Consecutive video frames usually show the same cards, so identical
//! hashes recur. Results can be reused because the table never changes.

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::phash::PerceptualHash;

/// LRU cache keyed by hash, counting hits and misses
pub struct QueryCache<V> {
    entries: LruCache<PerceptualHash, V>,
    hits: u64,
    misses: u64,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &PerceptualHash) -> Option<V> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: PerceptualHash, value: V) {
        self.entries.put(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> PerceptualHash {
        PerceptualHash::parse(&n.to_string(), 8).unwrap()
    }

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_hit_and_miss_counting() {
        let mut cache = QueryCache::new(capacity(4));
        assert_eq!(cache.get(&key(1)), None);
        cache.insert(key(1), "one");
        assert_eq!(cache.get(&key(1)), Some("one"));
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = QueryCache::new(capacity(2));
        cache.insert(key(1), 1);
        cache.insert(key(2), 2);

        // Touching 1 makes 2 the eviction candidate
        assert_eq!(cache.get(&key(1)), Some(1));
        cache.insert(key(3), 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&key(2)), None);
        assert_eq!(cache.get(&key(1)), Some(1));
        assert_eq!(cache.get(&key(3)), Some(3));
    }

    #[test]
    fn test_reinsert_replaces_value() {
        let mut cache = QueryCache::new(capacity(2));
        cache.insert(key(1), 1);
        cache.insert(key(1), 10);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(1)), Some(10));
    }
}

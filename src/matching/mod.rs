//! Matching Layer
//!
//! Finds the reference card closest to a query hash by Hamming distance.
//! A distance above the threshold means the query is not a known card.

pub mod cache;
pub mod index;
pub mod table;
pub mod trie;

pub use index::{build_index, HashIndex, IndexKind, LinearIndex, Neighbor};
pub use table::{CardIdentity, ReferenceEntry, ReferenceTable};
pub use trie::TrieIndex;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ScanError, ScanResult};
use crate::phash::PerceptualHash;
use cache::QueryCache;

/// Matching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Largest Hamming distance still accepted as a match
    pub threshold: u32,
    /// Search structure
    pub index: IndexKind,
    /// Memoized queries (0 disables the cache)
    pub cache_capacity: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            threshold: 130,
            index: IndexKind::Linear,
            cache_capacity: 1024,
        }
    }
}

/// A reference card and its distance from the query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardMatch {
    pub card: CardIdentity,
    pub distance: u32,
}

/// Nearest entry within `threshold` by a plain scan, or `None`
pub fn find_match(query: &PerceptualHash, table: &ReferenceTable, threshold: u32) -> Option<CardMatch> {
    LinearIndex::scan(table, query, threshold).map(|n| CardMatch {
        card: table.card(n.index).clone(),
        distance: n.distance,
    })
}

/// Reference matcher shared by all pipeline workers
pub struct Matcher {
    table: Arc<ReferenceTable>,
    index: Box<dyn HashIndex>,
    threshold: u32,
    cache: Option<Mutex<QueryCache<Option<CardMatch>>>>,
}

impl Matcher {
    pub fn new(table: Arc<ReferenceTable>, config: &MatchConfig) -> Self {
        let index = build_index(config.index, table.clone());
        debug!(
            "Matcher ready: {} entries, {} index, threshold {}",
            table.len(),
            index.name(),
            config.threshold
        );

        Self {
            table,
            index,
            threshold: config.threshold,
            cache: NonZeroUsize::new(config.cache_capacity).map(|capacity| Mutex::new(QueryCache::new(capacity))),
        }
    }

    pub fn table(&self) -> &Arc<ReferenceTable> {
        &self.table
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn check_width(&self, query: &PerceptualHash) -> ScanResult<()> {
        if query.bit_len() != self.table.bit_len() {
            return Err(ScanError::InvalidHash(format!(
                "query has {} bits, reference table has {}",
                query.bit_len(),
                self.table.bit_len()
            )));
        }
        Ok(())
    }

    fn to_match(&self, neighbor: Neighbor) -> CardMatch {
        CardMatch {
            card: self.table.card(neighbor.index).clone(),
            distance: neighbor.distance,
        }
    }

    /// Best reference card within the threshold
    pub fn find(&self, query: &PerceptualHash) -> ScanResult<Option<CardMatch>> {
        self.check_width(query)?;

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.lock().get(query) {
                return Ok(hit);
            }
        }

        let result = self
            .index
            .nearest(query, self.threshold)
            .map(|n| self.to_match(n));

        if let Some(cache) = &self.cache {
            cache.lock().insert(query.clone(), result.clone());
        }
        Ok(result)
    }

    /// Up to `n` reference cards within the threshold, best first
    pub fn find_n(&self, query: &PerceptualHash, n: usize) -> ScanResult<Vec<CardMatch>> {
        self.check_width(query)?;
        Ok(self
            .index
            .within(query, self.threshold)
            .into_iter()
            .take(n)
            .map(|neighbor| self.to_match(neighbor))
            .collect())
    }

    /// Cache (hits, misses), if caching is enabled
    pub fn cache_stats(&self) -> Option<(u64, u64)> {
        self.cache.as_ref().map(|c| c.lock().stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::tests::{hash_with_ones, table_of};

    #[test]
    fn test_threshold_boundary() {
        let query = PerceptualHash::zero(256);

        let at = table_of(256, &[("edge", hash_with_ones(256, 130))]);
        let found = find_match(&query, &at, 130).unwrap();
        assert_eq!(found.card.scryfall_id, "edge");
        assert_eq!(found.distance, 130);

        let beyond = table_of(256, &[("edge", hash_with_ones(256, 131))]);
        assert!(find_match(&query, &beyond, 130).is_none());
    }

    #[test]
    fn test_matcher_backends_agree_at_boundary() {
        let table = table_of(
            256,
            &[("b", hash_with_ones(256, 131)), ("a", hash_with_ones(256, 130))],
        );
        for kind in [IndexKind::Linear, IndexKind::Trie] {
            let matcher = Matcher::new(
                table.clone(),
                &MatchConfig {
                    index: kind,
                    ..Default::default()
                },
            );
            let found = matcher.find(&PerceptualHash::zero(256)).unwrap().unwrap();
            assert_eq!(found.card.scryfall_id, "a", "{:?}", kind);
        }
    }

    #[test]
    fn test_find_uses_cache() {
        let table = table_of(64, &[("a", hash_with_ones(64, 2))]);
        let matcher = Matcher::new(table, &MatchConfig::default());
        let query = PerceptualHash::zero(64);

        let first = matcher.find(&query).unwrap();
        let second = matcher.find(&query).unwrap();

        assert_eq!(first, second);
        assert_eq!(matcher.cache_stats(), Some((1, 1)));
    }

    #[test]
    fn test_cache_can_be_disabled() {
        let table = table_of(64, &[("a", hash_with_ones(64, 2))]);
        let config = MatchConfig {
            cache_capacity: 0,
            ..Default::default()
        };
        let matcher = Matcher::new(table, &config);
        matcher.find(&PerceptualHash::zero(64)).unwrap();
        assert_eq!(matcher.cache_stats(), None);
    }

    #[test]
    fn test_find_n_orders_results() {
        let table = table_of(
            64,
            &[
                ("x", hash_with_ones(64, 9)),
                ("y", hash_with_ones(64, 1)),
                ("z", hash_with_ones(64, 5)),
            ],
        );
        let matcher = Matcher::new(table, &MatchConfig::default());
        let top = matcher.find_n(&PerceptualHash::zero(64), 2).unwrap();

        let ids: Vec<&str> = top.iter().map(|m| m.card.scryfall_id.as_str()).collect();
        assert_eq!(ids, vec!["y", "z"]);
    }

    #[test]
    fn test_width_mismatch_is_error() {
        let table = table_of(64, &[("a", hash_with_ones(64, 2))]);
        let matcher = Matcher::new(table, &MatchConfig::default());
        assert!(matches!(
            matcher.find(&PerceptualHash::zero(256)),
            Err(ScanError::InvalidHash(_))
        ));
    }
}

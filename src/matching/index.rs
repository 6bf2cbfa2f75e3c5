//! Nearest-neighbour search over the reference table

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use super::table::ReferenceTable;
use super::trie::TrieIndex;
use crate::phash::{hamming_words, PerceptualHash};

/// A table entry and its distance from the query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: u32,
}

/// Search structure over an immutable reference table
///
/// Every implementation must return the same answers: the nearest entry
/// is the one with the smallest distance, then the smallest `scryfall_id`,
/// then the earliest table position.
pub trait HashIndex: Send + Sync {
    /// Best entry within `max_distance` of `query`
    fn nearest(&self, query: &PerceptualHash, max_distance: u32) -> Option<Neighbor>;

    /// Every entry within `max_distance`, best first
    fn within(&self, query: &PerceptualHash, max_distance: u32) -> Vec<Neighbor>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Index backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Packed XOR + popcount over the whole table
    #[default]
    Linear,
    /// Binary trie with branch pruning
    Trie,
}

/// Build the configured index over a table
pub fn build_index(kind: IndexKind, table: Arc<ReferenceTable>) -> Box<dyn HashIndex> {
    match kind {
        IndexKind::Linear => Box::new(LinearIndex::new(table)),
        IndexKind::Trie => Box::new(TrieIndex::build(table)),
    }
}

/// Total order used to rank candidates: distance, then id, then position
pub(crate) fn rank(table: &ReferenceTable, a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .cmp(&b.distance)
        .then_with(|| table.card(a.index).scryfall_id.cmp(&table.card(b.index).scryfall_id))
        .then_with(|| a.index.cmp(&b.index))
}

/// Keep whichever of `best` and `candidate` ranks first
pub(crate) fn prefer(table: &ReferenceTable, best: &mut Option<Neighbor>, candidate: Neighbor) {
    if best.map_or(true, |current| rank(table, &candidate, &current) == Ordering::Less) {
        *best = Some(candidate);
    }
}

/// Exhaustive scan of the packed hash buffer
pub struct LinearIndex {
    table: Arc<ReferenceTable>,
}

impl LinearIndex {
    pub fn new(table: Arc<ReferenceTable>) -> Self {
        Self { table }
    }

    /// Nearest entry by scanning `table` directly
    pub fn scan(table: &ReferenceTable, query: &PerceptualHash, max_distance: u32) -> Option<Neighbor> {
        let mut best: Option<Neighbor> = None;
        for (index, words) in table.packed().chunks_exact(table.words_per_hash()).enumerate() {
            let distance = hamming_words(query.words(), words);
            if distance <= max_distance {
                prefer(table, &mut best, Neighbor { index, distance });
            }
        }
        best
    }
}

impl HashIndex for LinearIndex {
    fn nearest(&self, query: &PerceptualHash, max_distance: u32) -> Option<Neighbor> {
        Self::scan(&self.table, query, max_distance)
    }

    fn within(&self, query: &PerceptualHash, max_distance: u32) -> Vec<Neighbor> {
        let table = &self.table;
        let mut found: Vec<Neighbor> = table
            .packed()
            .chunks_exact(table.words_per_hash())
            .enumerate()
            .filter_map(|(index, words)| {
                let distance = hamming_words(query.words(), words);
                (distance <= max_distance).then_some(Neighbor { index, distance })
            })
            .collect();

        found.sort_by(|a, b| rank(table, a, b));
        found
    }

    fn name(&self) -> &'static str {
        "linear"
    }
}

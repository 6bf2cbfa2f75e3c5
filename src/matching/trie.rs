//! Exact Hamming search with a binary trie
//!
//! Entries are inserted bit by bit (most significant first). A leaf holds a
//! single entry until a second one arrives below it, at which point the
//! resident is pushed one level down; only entries with identical hashes
//! share a leaf at full depth. During search, the number of mismatched bits
//! along a path is a lower bound on the distance of every entry below it,
//! so branches whose prefix cost exceeds the bound are skipped.

use std::sync::Arc;

use super::index::{prefer, rank, HashIndex, Neighbor};
use super::table::ReferenceTable;
use crate::phash::{hamming_words, PerceptualHash};

const NONE: u32 = 0;

#[derive(Debug, Default)]
struct Node {
    /// Child per bit value; `NONE` when absent (the root is never a child)
    children: [u32; 2],
    /// Table indices resident at this node
    items: Vec<u32>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.children == [NONE, NONE]
    }
}

pub struct TrieIndex {
    table: Arc<ReferenceTable>,
    nodes: Vec<Node>,
}

impl TrieIndex {
    pub fn build(table: Arc<ReferenceTable>) -> Self {
        let mut trie = Self {
            table,
            nodes: vec![Node::default()],
        };
        for index in 0..trie.table.len() {
            trie.insert(index as u32);
        }
        trie
    }

    /// Number of allocated nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn alloc(&mut self, node: Node) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    fn insert(&mut self, item: u32) {
        let bits = self.table.bit_len();
        let mut node = 0usize;
        let mut depth = 0u32;

        loop {
            if node != 0 && self.nodes[node].is_leaf() {
                if depth == bits {
                    self.nodes[node].items.push(item);
                    return;
                }
                // Split: move the resident one level down
                let resident = std::mem::take(&mut self.nodes[node].items);
                if let Some(&first) = resident.first() {
                    let branch = self.table.hash_bit(first as usize, depth) as usize;
                    let child = self.alloc(Node {
                        children: [NONE, NONE],
                        items: resident,
                    });
                    self.nodes[node].children[branch] = child;
                }
            }

            let branch = self.table.hash_bit(item as usize, depth) as usize;
            match self.nodes[node].children[branch] {
                NONE => {
                    let child = self.alloc(Node {
                        children: [NONE, NONE],
                        items: vec![item],
                    });
                    self.nodes[node].children[branch] = child;
                    return;
                }
                child => {
                    node = child as usize;
                    depth += 1;
                }
            }
        }
    }

    /// Depth-first walk visiting every entry that could lie within `bound`
    ///
    /// `visit` returns the bound to use from then on, letting nearest-search
    /// tighten it as better entries are found.
    fn search<F>(&self, query: &PerceptualHash, mut bound: u32, mut visit: F)
    where
        F: FnMut(Neighbor) -> u32,
    {
        let mut stack: Vec<(u32, u32, u32)> = vec![(0, 0, 0)];
        while let Some((node, depth, cost)) = stack.pop() {
            if cost > bound {
                continue;
            }
            let n = &self.nodes[node as usize];

            for &item in &n.items {
                let distance = hamming_words(query.words(), self.table.hash_words(item as usize));
                if distance <= bound {
                    bound = visit(Neighbor {
                        index: item as usize,
                        distance,
                    });
                }
            }

            if n.is_leaf() || depth >= query.bit_len() {
                continue;
            }
            let wanted = query.bit(depth) as usize;
            // Matching branch is pushed last so it is explored first
            for branch in [1 - wanted, wanted] {
                let child = n.children[branch];
                let step = (branch != wanted) as u32;
                if child != NONE && cost + step <= bound {
                    stack.push((child, depth + 1, cost + step));
                }
            }
        }
    }
}

impl HashIndex for TrieIndex {
    fn nearest(&self, query: &PerceptualHash, max_distance: u32) -> Option<Neighbor> {
        let mut best: Option<Neighbor> = None;
        self.search(query, max_distance, |candidate| {
            prefer(&self.table, &mut best, candidate);
            // Ties must still be visited for the id tie-break
            best.map_or(max_distance, |b| b.distance)
        });
        best
    }

    fn within(&self, query: &PerceptualHash, max_distance: u32) -> Vec<Neighbor> {
        let mut found = Vec::new();
        self.search(query, max_distance, |candidate| {
            found.push(candidate);
            max_distance
        });
        found.sort_by(|a, b| rank(&self.table, a, b));
        found
    }

    fn name(&self) -> &'static str {
        "trie"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::index::tests::{hash_with_ones, table_of};
    use crate::matching::index::LinearIndex;

    fn pseudo_random_hash(seed: &mut u64, bits: u32) -> PerceptualHash {
        let v: Vec<bool> = (0..bits)
            .map(|_| {
                *seed ^= *seed << 13;
                *seed ^= *seed >> 7;
                *seed ^= *seed << 17;
                *seed & 1 == 1
            })
            .collect();
        PerceptualHash::from_bits(&v)
    }

    #[test]
    fn test_agrees_with_linear_scan() {
        let mut seed = 0x9E37_79B9_7F4A_7C15u64;
        let hashes: Vec<PerceptualHash> = (0..300).map(|_| pseudo_random_hash(&mut seed, 64)).collect();
        let ids: Vec<String> = (0..300).map(|i| format!("id-{:03}", (i * 37) % 300)).collect();
        let rows: Vec<(&str, PerceptualHash)> = ids
            .iter()
            .map(String::as_str)
            .zip(hashes.iter().cloned())
            .collect();
        let table = table_of(64, &rows);

        let linear = LinearIndex::new(table.clone());
        let trie = TrieIndex::build(table);

        for _ in 0..50 {
            let query = pseudo_random_hash(&mut seed, 64);
            for max in [10, 24, 32, 64] {
                assert_eq!(trie.nearest(&query, max), linear.nearest(&query, max));
                assert_eq!(trie.within(&query, max), linear.within(&query, max));
            }
        }
    }

    #[test]
    fn test_exact_and_duplicate_hashes() {
        let h = hash_with_ones(16, 7);
        let table = table_of(
            16,
            &[("b", h.clone()), ("a", h.clone()), ("c", hash_with_ones(16, 9))],
        );
        let trie = TrieIndex::build(table);

        let best = trie.nearest(&h, 0).unwrap();
        assert_eq!(best, Neighbor { index: 1, distance: 0 });
        assert_eq!(trie.within(&h, 2).len(), 3);
        assert!(trie.nearest(&hash_with_ones(16, 16), 3).is_none());
    }

    #[test]
    fn test_empty_table() {
        let trie = TrieIndex::build(table_of(64, &[]));
        assert_eq!(trie.node_count(), 1);
        assert!(trie.nearest(&PerceptualHash::zero(64), 64).is_none());
    }
}

//! Reference table of known card hashes
//!
//! Hashes are stored packed in one contiguous word buffer (`words_per_hash`
//! words per entry) so a full-table scan is a linear walk over memory. The
//! table is built once and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ScanError, ScanResult};
use crate::phash::{bit_at, words_for_bits, PerceptualHash};

/// Identity of a known card printing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardIdentity {
    pub scryfall_id: String,
    pub name: String,
    pub set: String,
}

impl CardIdentity {
    pub fn new(scryfall_id: impl Into<String>, name: impl Into<String>, set: impl Into<String>) -> Self {
        Self {
            scryfall_id: scryfall_id.into(),
            name: name.into(),
            set: set.into(),
        }
    }
}

/// One row of the reference dataset
#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub card: CardIdentity,
    pub phash: PerceptualHash,
}

/// Immutable packed reference table
#[derive(Debug, Clone)]
pub struct ReferenceTable {
    bits: u32,
    words_per_hash: usize,
    cards: Vec<CardIdentity>,
    words: Vec<u64>,
}

impl ReferenceTable {
    /// Build a table from entries; every hash must have width `bits`
    pub fn from_entries(bits: u32, entries: impl IntoIterator<Item = ReferenceEntry>) -> ScanResult<Self> {
        let mut table = Self {
            bits,
            words_per_hash: words_for_bits(bits),
            cards: Vec::new(),
            words: Vec::new(),
        };

        for entry in entries {
            if entry.phash.bit_len() != bits {
                return Err(ScanError::DatasetLoad(format!(
                    "entry {} has a {}-bit hash, table expects {}",
                    entry.card.scryfall_id,
                    entry.phash.bit_len(),
                    bits
                )));
            }
            table.words.extend_from_slice(entry.phash.words());
            table.cards.push(entry.card);
        }

        Ok(table)
    }

    /// Parse CSV with a header naming `scryfall_id`, `name`, `set` and `phash`
    ///
    /// Columns may appear in any order and extra columns are ignored. Hashes
    /// are integer literals (decimal as written by the dataset generator).
    pub fn from_csv<R: BufRead>(reader: R, bits: u32) -> ScanResult<Self> {
        let mut lines = reader.lines().enumerate();

        let header = loop {
            match lines.next() {
                Some((_, line)) => {
                    let line = line.map_err(|e| ScanError::DatasetLoad(format!("read error: {}", e)))?;
                    if !line.trim().is_empty() {
                        break split_csv_line(&line);
                    }
                }
                None => return Err(ScanError::DatasetLoad("dataset is empty".to_string())),
            }
        };

        let column = |name: &str| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .ok_or_else(|| ScanError::DatasetLoad(format!("missing column '{}'", name)))
        };
        let id_col = column("scryfall_id")?;
        let name_col = column("name")?;
        let set_col = column("set")?;
        let hash_col = column("phash")?;
        let width = [id_col, name_col, set_col, hash_col].into_iter().max().unwrap_or(0) + 1;

        let mut entries = Vec::new();
        for (index, line) in lines {
            let line_no = index + 1;
            let line = line.map_err(|e| ScanError::DatasetLoad(format!("line {}: {}", line_no, e)))?;
            if line.trim().is_empty() {
                continue;
            }

            let fields = split_csv_line(&line);
            if fields.len() < width {
                return Err(ScanError::DatasetLoad(format!(
                    "line {}: expected at least {} fields, found {}",
                    line_no,
                    width,
                    fields.len()
                )));
            }

            let phash = PerceptualHash::parse(&fields[hash_col], bits)
                .map_err(|e| ScanError::DatasetLoad(format!("line {}: {}", line_no, e)))?;
            entries.push(ReferenceEntry {
                card: CardIdentity::new(
                    fields[id_col].as_str(),
                    fields[name_col].as_str(),
                    fields[set_col].as_str(),
                ),
                phash,
            });
        }

        debug!("Parsed {} reference rows", entries.len());
        Self::from_entries(bits, entries)
    }

    /// Load a CSV dataset from disk
    pub fn load_csv_file(path: &Path, bits: u32) -> ScanResult<Self> {
        let file = File::open(path)
            .map_err(|e| ScanError::DatasetLoad(format!("cannot open {:?}: {}", path, e)))?;
        let table = Self::from_csv(BufReader::new(file), bits)?;
        info!("Loaded {} reference hashes from {:?}", table.len(), path);
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Hash width in bits
    pub fn bit_len(&self) -> u32 {
        self.bits
    }

    pub fn words_per_hash(&self) -> usize {
        self.words_per_hash
    }

    /// The whole packed hash buffer
    pub fn packed(&self) -> &[u64] {
        &self.words
    }

    pub fn card(&self, index: usize) -> &CardIdentity {
        &self.cards[index]
    }

    /// Packed words of one entry's hash
    pub fn hash_words(&self, index: usize) -> &[u64] {
        let start = index * self.words_per_hash;
        &self.words[start..start + self.words_per_hash]
    }

    /// Bit `i` (most significant first) of one entry's hash
    pub(crate) fn hash_bit(&self, index: usize, i: u32) -> bool {
        bit_at(self.hash_words(index), self.bits, i)
    }

    pub fn hash(&self, index: usize) -> PerceptualHash {
        // Width and packing come from the table itself
        PerceptualHash::from_words(self.bits, self.hash_words(index).to_vec())
            .unwrap_or_else(|_| PerceptualHash::zero(self.bits))
    }

    /// Iterate over (identity, packed hash) pairs in table order
    pub fn iter(&self) -> impl Iterator<Item = (&CardIdentity, &[u64])> {
        self.cards.iter().zip(self.words.chunks_exact(self.words_per_hash))
    }
}

/// Split one CSV record, honouring double-quoted fields and `""` escapes
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches(&['\r', '\n'][..]).chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

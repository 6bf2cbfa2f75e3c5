//! Perceptual hashing
//!
//! A perceptual hash is a fixed-width bit vector treated as one unsigned
//! integer. Bits are produced most-significant first and packed into
//! big-endian 64-bit words, right-aligned, so the integer value (and its
//! decimal form in reference datasets) is independent of the packing.

pub mod dct;
pub mod hasher;

pub use hasher::{phash, phash_gray, HashConfig};

use std::fmt;
use std::str::FromStr;

use crate::error::{ScanError, ScanResult};

/// Fixed-width perceptual hash
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PerceptualHash {
    bits: u32,
    /// Big-endian words; unused high bits of `words[0]` are zero
    words: Vec<u64>,
}

/// Number of 64-bit words needed to hold `bits` bits
pub fn words_for_bits(bits: u32) -> usize {
    (bits as usize).div_ceil(64)
}

/// Hamming distance between two equally sized word slices
#[inline]
pub fn hamming_words(a: &[u64], b: &[u64]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

impl PerceptualHash {
    /// All-zero hash of the given width
    pub fn zero(bits: u32) -> Self {
        Self {
            bits,
            words: vec![0; words_for_bits(bits)],
        }
    }

    /// Build from a bit sequence, first bit most significant
    pub fn from_bits(bits: &[bool]) -> Self {
        let mut hash = Self::zero(bits.len() as u32);
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                hash.set_bit(i as u32);
            }
        }
        hash
    }

    /// Build from big-endian words, rejecting values wider than `bits`
    pub fn from_words(bits: u32, words: Vec<u64>) -> ScanResult<Self> {
        if words.len() != words_for_bits(bits) {
            return Err(ScanError::InvalidHash(format!(
                "{} words cannot hold a {}-bit hash",
                words.len(),
                bits
            )));
        }

        let hash = Self { bits, words };
        if !hash.fits() {
            return Err(ScanError::InvalidHash(format!(
                "value does not fit in {} bits",
                bits
            )));
        }
        Ok(hash)
    }

    /// Hash width in bits
    pub fn bit_len(&self) -> u32 {
        self.bits
    }

    /// Packed big-endian words
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// The `i`-th generated bit (0 is the most significant)
    pub fn bit(&self, i: u32) -> bool {
        bit_at(&self.words, self.bits, i)
    }

    fn set_bit(&mut self, i: u32) {
        let pos = self.bits - 1 - i;
        let word = self.words.len() - 1 - (pos / 64) as usize;
        self.words[word] |= 1 << (pos % 64);
    }

    /// Number of differing bits
    ///
    /// Hashes of different widths are compared over their packed words; the
    /// matcher never mixes widths.
    pub fn hamming_distance(&self, other: &PerceptualHash) -> u32 {
        debug_assert_eq!(self.bits, other.bits);
        hamming_words(&self.words, &other.words)
    }

    fn fits(&self) -> bool {
        let spare = self.words.len() as u32 * 64 - self.bits;
        spare == 0 || self.words.first().map_or(true, |w| w >> (64 - spare) == 0)
    }

    /// Parse a decimal, `0x` hexadecimal or `0b` binary literal of the given width
    pub fn parse(text: &str, bits: u32) -> ScanResult<Self> {
        let text = text.trim();
        let invalid = |reason: &str| ScanError::InvalidHash(format!("{:?}: {}", text, reason));

        let (digits, radix) = if let Some(rest) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            (rest, 16)
        } else if let Some(rest) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
            (rest, 2)
        } else {
            (text, 10)
        };
        if digits.is_empty() {
            return Err(invalid("no digits"));
        }

        // Little-endian limbs while accumulating
        let mut limbs = vec![0u64; words_for_bits(bits)];
        for c in digits.chars() {
            if c == '_' {
                continue;
            }
            let digit = c.to_digit(radix).ok_or_else(|| invalid("invalid digit"))?;
            let mut carry = digit as u128;
            for limb in limbs.iter_mut() {
                let v = (*limb as u128) * radix as u128 + carry;
                *limb = v as u64;
                carry = v >> 64;
            }
            if carry != 0 {
                return Err(invalid(&format!("wider than {} bits", bits)));
            }
        }

        limbs.reverse();
        Self::from_words(bits, limbs).map_err(|_| invalid(&format!("wider than {} bits", bits)))
    }

    /// Zero-padded lowercase hex, no prefix
    pub fn to_hex(&self) -> String {
        let digits = (self.bits as usize).div_ceil(4);
        let full: String = self.words.iter().map(|w| format!("{:016x}", w)).collect();
        full[full.len() - digits..].to_string()
    }

    /// Decimal representation, as used by reference datasets
    pub fn to_decimal(&self) -> String {
        const CHUNK: u64 = 10_000_000_000_000_000_000;

        let mut limbs: Vec<u64> = self.words.clone();
        let mut chunks = Vec::new();
        while limbs.iter().any(|&l| l != 0) {
            // Long division of the big-endian number by 10^19
            let mut rem: u128 = 0;
            for limb in limbs.iter_mut() {
                let cur = (rem << 64) | *limb as u128;
                *limb = (cur / CHUNK as u128) as u64;
                rem = cur % CHUNK as u128;
            }
            chunks.push(rem as u64);
        }

        match chunks.split_last() {
            None => "0".to_string(),
            Some((head, rest)) => {
                let mut out = head.to_string();
                for chunk in rest.iter().rev() {
                    out.push_str(&format!("{:019}", chunk));
                }
                out
            }
        }
    }
}

/// The `i`-th generated bit of a packed hash
#[inline]
pub(crate) fn bit_at(words: &[u64], bits: u32, i: u32) -> bool {
    let pos = bits - 1 - i;
    let word = words.len() - 1 - (pos / 64) as usize;
    (words[word] >> (pos % 64)) & 1 == 1
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PerceptualHash({}: 0x{})", self.bits, self.to_hex())
    }
}

/// Parses a 256-bit literal; use [`PerceptualHash::parse`] for other widths
impl FromStr for PerceptualHash {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, HashConfig::default().bit_len())
    }
}

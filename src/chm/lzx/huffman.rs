//! Canonical Huffman decoding for the LZX trees.
//!
//! Codes are assigned canonically (shorter codes first, ties broken by symbol
//! order) and read one bit at a time, so no lookup table has to be rebuilt
//! for every block.

use super::bits::BitReader;
use crate::error::{Error, Result};

pub const MAX_CODE_LEN: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct HuffmanTable {
    counts: [u16; MAX_CODE_LEN + 1],
    /// Symbols ordered by (code length, symbol).
    symbols: Vec<u16>,
}

impl HuffmanTable {
    /// Build a table from per-symbol code lengths (0 = unused).
    ///
    /// An all-zero tree is accepted and fails only when a symbol is decoded
    /// from it; an over-subscribed tree is rejected.
    pub fn from_lengths(lengths: &[u8]) -> Result<Self> {
        let mut counts = [0u16; MAX_CODE_LEN + 1];
        for &len in lengths {
            let len = usize::from(len);
            if len > MAX_CODE_LEN {
                return Err(Error::corrupt(format!("Huffman code length {len}")));
            }
            counts[len] += 1;
        }
        counts[0] = 0;

        let mut left: i32 = 1;
        for &count in &counts[1..] {
            left = (left << 1) - i32::from(count);
            if left < 0 {
                return Err(Error::corrupt("over-subscribed Huffman tree"));
            }
        }

        let mut offsets = [0usize; MAX_CODE_LEN + 2];
        for len in 1..=MAX_CODE_LEN {
            offsets[len + 1] = offsets[len] + usize::from(counts[len]);
        }
        let mut symbols = vec![0u16; offsets[MAX_CODE_LEN + 1]];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                let slot = &mut offsets[usize::from(len)];
                symbols[*slot] = symbol as u16;
                *slot += 1;
            }
        }

        Ok(Self { counts, symbols })
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn decode(&self, bits: &mut BitReader<'_>) -> Result<u16> {
        if self.symbols.is_empty() {
            return Err(Error::corrupt("symbol read from empty Huffman tree"));
        }
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for len in 1..=MAX_CODE_LEN {
            code |= bits.read_bit()? as i32;
            let count = i32::from(self.counts[len]);
            if code - first < count {
                return Ok(self.symbols[(index + code - first) as usize]);
            }
            index += count;
            first = (first + count) << 1;
            code <<= 1;
        }
        Err(Error::corrupt("invalid Huffman code"))
    }
}

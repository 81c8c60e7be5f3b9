//! LZX bitstream: 16-bit little-endian words consumed most significant bit first.

use crate::error::{Error, Result};

pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    /// Pending bits, left aligned.
    buf: u64,
    bits: u32,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            buf: 0,
            bits: 0,
        }
    }

    fn refill(&mut self) -> Result<()> {
        let word = self
            .data
            .get(self.pos..self.pos + 2)
            .ok_or_else(|| Error::corrupt("LZX bitstream truncated"))?;
        let word = u64::from(u16::from_le_bytes([word[0], word[1]]));
        self.buf |= word << (48 - self.bits);
        self.bits += 16;
        self.pos += 2;
        Ok(())
    }

    /// Read `n` (at most 32) bits as an unsigned value.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 32);
        if n == 0 {
            return Ok(0);
        }
        while self.bits < n {
            self.refill()?;
        }
        let value = (self.buf >> (64 - n)) as u32;
        self.buf <<= n;
        self.bits -= n;
        Ok(value)
    }

    pub fn read_bit(&mut self) -> Result<u32> {
        self.read_bits(1)
    }

    /// Drop to the next word boundary before a stored block. A stream that is
    /// already on a boundary skips one whole padding word.
    pub fn align_for_stored(&mut self) -> Result<()> {
        if self.bits == 0 {
            self.read_bits(16)?;
        }
        self.buf = 0;
        self.bits = 0;
        Ok(())
    }

    /// Take `n` raw bytes. Only valid while [`align_for_stored`](Self::align_for_stored)
    /// has left no buffered bits.
    pub fn read_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        debug_assert_eq!(self.bits, 0);
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| Error::corrupt("stored LZX block truncated"))?;
        let raw = &self.data[self.pos..end];
        self.pos = end;
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_words_msb_first() {
        // Word 0xA5C3 stored little endian.
        let data = [0xC3, 0xA5, 0xFF, 0x00];
        let mut bits = BitReader::new(&data);
        assert_eq!(bits.read_bits(4).unwrap(), 0xA);
        assert_eq!(bits.read_bits(8).unwrap(), 0x5C);
        assert_eq!(bits.read_bits(4).unwrap(), 0x3);
        assert_eq!(bits.read_bits(16).unwrap(), 0x00FF);
        assert!(bits.read_bit().is_err());
    }

    #[test]
    fn test_read_across_word_boundary() {
        let data = [0x00, 0x80, 0x00, 0x80];
        let mut bits = BitReader::new(&data);
        assert_eq!(bits.read_bits(1).unwrap(), 1);
        assert_eq!(bits.read_bits(17).unwrap(), 0b10);
        assert_eq!(bits.read_bits(14).unwrap(), 0);
    }

    #[test]
    fn test_align_for_stored_skips_partial_or_whole_word() {
        let data = [0xFF, 0xFF, 0x11, 0x22, 0x33];
        let mut bits = BitReader::new(&data);
        bits.read_bits(3).unwrap();
        bits.align_for_stored().unwrap();
        assert_eq!(bits.read_raw(3).unwrap(), &[0x11, 0x22, 0x33]);

        let mut bits = BitReader::new(&data);
        bits.align_for_stored().unwrap();
        assert_eq!(bits.read_raw(2).unwrap(), &[0x11, 0x22]);
        assert!(bits.read_raw(2).is_err());
    }
}

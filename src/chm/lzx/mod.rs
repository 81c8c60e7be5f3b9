//! LZX decompression, frame by frame.
//!
//! The decoder keeps the sliding window, repeated offsets and tree lengths
//! across frames until [`LzxDecoder::reset`] is called. Callers reset at
//! every reset point recorded by the archive and can therefore start
//! decoding at any reset frame instead of at the beginning of the stream.
//!
//! Block types:
//! - 1 (verbatim): main and length trees, offsets as plain extra bits
//! - 2 (aligned offset): as verbatim plus an aligned tree for the low 3 offset bits
//! - 3 (uncompressed): new R0-R2 followed by stored bytes

mod bits;
mod huffman;

use tracing::trace;

pub use bits::BitReader;
use huffman::HuffmanTable;

use crate::error::{Error, Result};

/// Bytes of output per frame.
pub const FRAME_SIZE: usize = 0x8000;

const NUM_CHARS: usize = 256;
const PRETREE_NUM_ELEMENTS: usize = 20;
const ALIGNED_NUM_ELEMENTS: usize = 8;
const NUM_PRIMARY_LENGTHS: usize = 7;
const LENGTH_NUM_ELEMENTS: usize = 249;
const MIN_MATCH: usize = 2;
const MAX_POSITION_SLOTS: usize = 51;

const EXTRA_BITS: [u8; MAX_POSITION_SLOTS] = extra_bits_table();
const POSITION_BASE: [u32; MAX_POSITION_SLOTS] = position_base_table();

const fn extra_bits_table() -> [u8; MAX_POSITION_SLOTS] {
    let mut table = [0u8; MAX_POSITION_SLOTS];
    let mut i = 4;
    while i < MAX_POSITION_SLOTS {
        let extra = (i - 2) / 2;
        table[i] = if extra > 17 { 17 } else { extra as u8 };
        i += 1;
    }
    table
}

const fn position_base_table() -> [u32; MAX_POSITION_SLOTS] {
    let extra = extra_bits_table();
    let mut table = [0u32; MAX_POSITION_SLOTS];
    let mut i = 1;
    while i < MAX_POSITION_SLOTS {
        table[i] = table[i - 1] + (1 << extra[i - 1]);
        i += 1;
    }
    table
}

fn position_slots(window_bits: u32) -> Result<usize> {
    Ok(match window_bits {
        15 => 30,
        16 => 32,
        17 => 34,
        18 => 36,
        19 => 38,
        20 => 42,
        21 => 50,
        n => return Err(Error::malformed(format!("unsupported LZX window of 2^{n} bytes"))),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    None,
    Verbatim,
    Aligned,
    Uncompressed,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    kind: BlockKind,
    length: usize,
    remaining: usize,
}

pub struct LzxDecoder {
    window: Vec<u8>,
    window_pos: usize,
    main_elements: usize,
    repeated: [u32; 3],
    main_lengths: Vec<u8>,
    length_lengths: Vec<u8>,
    main_tree: HuffmanTable,
    length_tree: HuffmanTable,
    aligned_tree: HuffmanTable,
    block: Block,
    header_read: bool,
    intel_started: bool,
    intel_filesize: i32,
    /// Bytes produced since the last reset; matches may not reach further back.
    since_reset: u64,
}

impl LzxDecoder {
    pub fn new(window_bits: u32) -> Result<Self> {
        let slots = position_slots(window_bits)?;
        let main_elements = NUM_CHARS + slots * 8;
        let mut decoder = Self {
            window: vec![0u8; 1 << window_bits],
            window_pos: 0,
            main_elements,
            repeated: [1; 3],
            main_lengths: vec![0; main_elements],
            length_lengths: vec![0; LENGTH_NUM_ELEMENTS],
            main_tree: HuffmanTable::default(),
            length_tree: HuffmanTable::default(),
            aligned_tree: HuffmanTable::default(),
            block: Block {
                kind: BlockKind::None,
                length: 0,
                remaining: 0,
            },
            header_read: false,
            intel_started: false,
            intel_filesize: 0,
            since_reset: 0,
        };
        decoder.reset();
        Ok(decoder)
    }

    /// Return to the state at a reset point.
    pub fn reset(&mut self) {
        self.window_pos = 0;
        self.repeated = [1; 3];
        self.main_lengths.fill(0);
        self.length_lengths.fill(0);
        self.block = Block {
            kind: BlockKind::None,
            length: 0,
            remaining: 0,
        };
        self.header_read = false;
        self.intel_started = false;
        self.intel_filesize = 0;
        self.since_reset = 0;
    }

    /// Decode one frame of `frame_size` bytes whose compressed data begins at
    /// the start of `input`. `frame_offset` is the uncompressed position of the
    /// frame in the whole stream and drives E8 call translation.
    pub fn decode_frame(
        &mut self,
        input: &[u8],
        frame_size: usize,
        frame_offset: u64,
    ) -> Result<Vec<u8>> {
        if frame_size == 0 || frame_size > FRAME_SIZE {
            return Err(Error::corrupt(format!("LZX frame size {frame_size}")));
        }
        let frame_start = self.window_pos;
        let frame_end = frame_start + frame_size;
        if frame_end > self.window.len() {
            return Err(Error::corrupt("LZX frame does not fit the window"));
        }

        let mut bits = BitReader::new(input);
        if !self.header_read {
            if bits.read_bit()? == 1 {
                let high = bits.read_bits(16)?;
                let low = bits.read_bits(16)?;
                self.intel_filesize = ((high << 16) | low) as i32;
            }
            self.header_read = true;
        }

        while self.window_pos < frame_end {
            if self.block.remaining == 0 {
                self.read_block_header(&mut bits)?;
                continue;
            }
            let want = self.block.remaining.min(frame_end - self.window_pos);
            let produced = match self.block.kind {
                BlockKind::Verbatim => self.decode_matches(&mut bits, want, frame_end, false)?,
                BlockKind::Aligned => self.decode_matches(&mut bits, want, frame_end, true)?,
                BlockKind::Uncompressed => self.copy_stored(&mut bits, want)?,
                BlockKind::None => return Err(Error::corrupt("LZX data before block header")),
            };
            self.block.remaining = self
                .block
                .remaining
                .checked_sub(produced)
                .ok_or_else(|| Error::corrupt("LZX match runs past end of block"))?;
        }

        let mut out = self.window[frame_start..frame_end].to_vec();
        if self.intel_started
            && self.intel_filesize != 0
            && frame_offset / (FRAME_SIZE as u64) < 32768
            && frame_size > 10
        {
            e8_translate(&mut out, frame_offset as i32, self.intel_filesize);
        }

        if self.window_pos == self.window.len() {
            self.window_pos = 0;
        }
        Ok(out)
    }

    fn read_block_header(&mut self, bits: &mut BitReader<'_>) -> Result<()> {
        if self.block.kind == BlockKind::Uncompressed && self.block.length & 1 == 1 {
            bits.read_raw(1)?;
        }

        let kind = bits.read_bits(3)?;
        let high = bits.read_bits(16)? as usize;
        let low = bits.read_bits(8)? as usize;
        let length = (high << 8) | low;

        let kind = match kind {
            1 => {
                self.read_main_and_length_trees(bits)?;
                BlockKind::Verbatim
            }
            2 => {
                let mut lengths = [0u8; ALIGNED_NUM_ELEMENTS];
                for len in &mut lengths {
                    *len = bits.read_bits(3)? as u8;
                }
                self.aligned_tree = HuffmanTable::from_lengths(&lengths)?;
                self.read_main_and_length_trees(bits)?;
                BlockKind::Aligned
            }
            3 => {
                self.intel_started = true;
                bits.align_for_stored()?;
                let raw = bits.read_raw(12)?;
                for (i, r) in self.repeated.iter_mut().enumerate() {
                    let at = i * 4;
                    *r = u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
                }
                BlockKind::Uncompressed
            }
            n => return Err(Error::corrupt(format!("LZX block type {n}"))),
        };
        trace!(?kind, length, "LZX block");

        self.block = Block {
            kind,
            length,
            remaining: length,
        };
        Ok(())
    }

    fn read_main_and_length_trees(&mut self, bits: &mut BitReader<'_>) -> Result<()> {
        read_lengths(bits, &mut self.main_lengths, 0, NUM_CHARS)?;
        read_lengths(bits, &mut self.main_lengths, NUM_CHARS, self.main_elements)?;
        self.main_tree = HuffmanTable::from_lengths(&self.main_lengths)?;
        if self.main_lengths[0xE8] != 0 {
            self.intel_started = true;
        }
        read_lengths(bits, &mut self.length_lengths, 0, LENGTH_NUM_ELEMENTS)?;
        self.length_tree = HuffmanTable::from_lengths(&self.length_lengths)?;
        Ok(())
    }

    /// Decode literals and matches until at least `want` bytes are produced.
    fn decode_matches(
        &mut self,
        bits: &mut BitReader<'_>,
        want: usize,
        frame_end: usize,
        aligned: bool,
    ) -> Result<usize> {
        let window_size = self.window.len();
        let mut produced = 0;
        while produced < want {
            let element = usize::from(self.main_tree.decode(bits)?);
            if element < NUM_CHARS {
                self.window[self.window_pos] = element as u8;
                self.window_pos += 1;
                self.since_reset += 1;
                produced += 1;
                continue;
            }

            let element = element - NUM_CHARS;
            let mut match_len = element & 7;
            if match_len == NUM_PRIMARY_LENGTHS {
                match_len += usize::from(self.length_tree.decode(bits)?);
            }
            match_len += MIN_MATCH;

            let slot = element >> 3;
            let offset = match slot {
                0 => self.repeated[0],
                1 => {
                    self.repeated.swap(0, 1);
                    self.repeated[0]
                }
                2 => {
                    self.repeated.swap(0, 2);
                    self.repeated[0]
                }
                _ => {
                    let offset = self.read_offset(bits, slot, aligned)?;
                    self.repeated = [offset, self.repeated[0], self.repeated[1]];
                    offset
                }
            } as usize;

            if self.window_pos + match_len > frame_end {
                return Err(Error::corrupt("LZX match runs past end of frame"));
            }
            if offset == 0 || offset > window_size || offset as u64 > self.since_reset {
                return Err(Error::corrupt(format!(
                    "LZX match offset {offset} reaches before stream start"
                )));
            }

            let mut src = (self.window_pos + window_size - offset) % window_size;
            for _ in 0..match_len {
                self.window[self.window_pos] = self.window[src];
                self.window_pos += 1;
                src = (src + 1) % window_size;
            }
            self.since_reset += match_len as u64;
            produced += match_len;
        }
        Ok(produced)
    }

    fn read_offset(&self, bits: &mut BitReader<'_>, slot: usize, aligned: bool) -> Result<u32> {
        if slot >= MAX_POSITION_SLOTS {
            return Err(Error::corrupt(format!("LZX position slot {slot}")));
        }
        let extra = u32::from(EXTRA_BITS[slot]);
        let mut offset = POSITION_BASE[slot] - 2;
        if aligned && extra >= 3 {
            if extra > 3 {
                offset += bits.read_bits(extra - 3)? << 3;
            }
            offset += u32::from(self.aligned_tree.decode(bits)?);
        } else if extra > 0 {
            offset += bits.read_bits(extra)?;
        }
        Ok(offset)
    }

    fn copy_stored(&mut self, bits: &mut BitReader<'_>, want: usize) -> Result<usize> {
        let raw = bits.read_raw(want)?;
        self.window[self.window_pos..self.window_pos + want].copy_from_slice(raw);
        self.window_pos += want;
        self.since_reset += want as u64;
        Ok(want)
    }
}

/// Read delta-coded tree lengths for `lens[first..last]` through a pretree.
fn read_lengths(bits: &mut BitReader<'_>, lens: &mut [u8], first: usize, last: usize) -> Result<()> {
    let mut pre = [0u8; PRETREE_NUM_ELEMENTS];
    for len in &mut pre {
        *len = bits.read_bits(4)? as u8;
    }
    let pretree = HuffmanTable::from_lengths(&pre)?;

    let delta = |old: u8, code: u16| ((u16::from(old) + 17 - code) % 17) as u8;

    let mut x = first;
    while x < last {
        let code = pretree.decode(bits)?;
        match code {
            17 => {
                let run = bits.read_bits(4)? as usize + 4;
                let end = (x + run).min(last);
                lens[x..end].fill(0);
                x = end;
            }
            18 => {
                let run = bits.read_bits(5)? as usize + 20;
                let end = (x + run).min(last);
                lens[x..end].fill(0);
                x = end;
            }
            19 => {
                let run = bits.read_bits(1)? as usize + 4;
                let code = pretree.decode(bits)?;
                if code > 16 {
                    return Err(Error::corrupt("LZX pretree run of a run"));
                }
                let value = delta(lens[x], code);
                let end = (x + run).min(last);
                lens[x..end].fill(value);
                x = end;
            }
            0..=16 => {
                lens[x] = delta(lens[x], code);
                x += 1;
            }
            _ => return Err(Error::corrupt(format!("LZX pretree symbol {code}"))),
        }
    }
    Ok(())
}

/// Undo the encoder's x86 CALL translation on one frame of output.
fn e8_translate(data: &mut [u8], start: i32, filesize: i32) {
    let end = data.len() - 10;
    let mut i = 0;
    let mut curpos = start;
    while i < end {
        if data[i] != 0xE8 {
            i += 1;
            curpos = curpos.wrapping_add(1);
            continue;
        }
        let abs = i32::from_le_bytes([data[i + 1], data[i + 2], data[i + 3], data[i + 4]]);
        if abs >= curpos.wrapping_neg() && abs < filesize {
            let rel = if abs >= 0 {
                abs.wrapping_sub(curpos)
            } else {
                abs.wrapping_add(filesize)
            };
            data[i + 1..i + 5].copy_from_slice(&rel.to_le_bytes());
        }
        i += 5;
        curpos = curpos.wrapping_add(5);
    }
}

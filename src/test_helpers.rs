//! Test helpers for building CHM archives in memory.
//!
//! These utilities are used by both unit tests and integration tests. They
//! write just enough of the format to exercise the reader: stored and LZX
//! content sections, PMGL/PMGI directories, `#SYSTEM` records and the
//! `#WINDOWS`/`#STRINGS` pair.

use crate::chm::FRAME_SIZE;
use crate::chm::compare_names;
use crate::chm::section::{CONTENT_PATH, CONTROL_DATA_PATH, RESET_TABLE_PATH};

/// Window bits used by every stream this module writes.
const WINDOW_BITS: u32 = 16;
const MAIN_ELEMENTS: usize = 256 + 32 * 8;
const LENGTH_ELEMENTS: usize = 249;

// ---------------------------------------------------------------------------
// LZX
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LzxToken {
    Literal(u8),
    /// Copy `len` (2 to [`MAX_MATCH`]) bytes from `offset` bytes back.
    Match { offset: u32, len: usize },
    /// Reuse repeated offset R0, R1 or R2.
    Repeat { slot: usize, len: usize },
}

impl LzxToken {
    fn output_len(&self) -> usize {
        match self {
            LzxToken::Literal(_) => 1,
            LzxToken::Match { len, .. } | LzxToken::Repeat { len, .. } => *len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LzxOp {
    Stored(Vec<u8>),
    Verbatim(Vec<LzxToken>),
    /// Like `Verbatim`, with the low 3 bits of long offsets coded through
    /// the aligned tree.
    Aligned(Vec<LzxToken>),
}

/// Longest match the encoder's length tree can express.
pub const MAX_MATCH: usize = 2 + 7 + LENGTH_SYMBOLS_USED - 1;

/// Length tree symbols given a code; the rest of the tree is zero.
const LENGTH_SYMBOLS_USED: usize = 128;
const PRETREE_ELEMENTS: usize = 20;
const ALIGNED_LENGTHS: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 7];

/// Writes 16-bit little-endian words, most significant bit first.
#[derive(Default)]
struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    bits: u32,
}

impl BitWriter {
    fn put(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            self.acc = (self.acc << 1) | ((value >> i) & 1);
            self.bits += 1;
            if self.bits == 16 {
                self.out.extend_from_slice(&(self.acc as u16).to_le_bytes());
                self.acc = 0;
                self.bits = 0;
            }
        }
    }

    fn flush_word(&mut self) {
        if self.bits > 0 {
            self.put(0, 16 - self.bits);
        }
    }

    fn align_for_stored(&mut self) {
        if self.bits == 0 {
            self.put(0, 16);
        } else {
            self.flush_word();
        }
    }

    fn raw(&mut self, bytes: &[u8]) {
        assert_eq!(self.bits, 0, "raw bytes must start on a word boundary");
        self.out.extend_from_slice(bytes);
    }
}

/// Canonical codes for `lengths`: shorter codes first, ties by symbol.
fn canonical_codes(lengths: &[u8]) -> Vec<u32> {
    let mut codes = vec![0u32; lengths.len()];
    let mut code = 0u32;
    for len in 1..=16u8 {
        for (symbol, _) in lengths.iter().enumerate().filter(|&(_, &l)| l == len) {
            codes[symbol] = code;
            code += 1;
        }
        code <<= 1;
    }
    codes
}

/// A Huffman tree the encoder writes symbols through.
struct Tree {
    lengths: Vec<u8>,
    codes: Vec<u32>,
}

impl Tree {
    fn new(lengths: Vec<u8>) -> Self {
        let codes = canonical_codes(&lengths);
        Self { lengths, codes }
    }

    fn put(&self, w: &mut BitWriter, symbol: usize) {
        let len = self.lengths[symbol];
        assert!(len > 0, "symbol {symbol} has no code");
        w.put(self.codes[symbol], u32::from(len));
    }
}

/// A minimal LZX encoder for a 64 KiB window.
///
/// The main tree is flat (every symbol 9 bits long). The length tree codes
/// the first 128 length footers in 7 bits, so matches reach
/// [`MAX_MATCH`] bytes. Tree lengths go through a flat 5-bit pretree using
/// the zero-run and same-run codes wherever a run allows.
pub struct LzxEncoder {
    main_prev: Vec<u8>,
    length_prev: Vec<u8>,
    main_tree: Tree,
    length_tree: Tree,
    aligned_tree: Tree,
    pretree: Tree,
    repeated: [u32; 3],
    e8_filesize: Option<u32>,
    header_written: bool,
    last_stored_odd: bool,
}

impl Default for LzxEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LzxEncoder {
    pub fn new() -> Self {
        let mut length_lengths = vec![0u8; LENGTH_ELEMENTS];
        length_lengths[..LENGTH_SYMBOLS_USED].fill(7);
        Self {
            main_prev: vec![0; MAIN_ELEMENTS],
            length_prev: vec![0; LENGTH_ELEMENTS],
            main_tree: Tree::new(vec![9; MAIN_ELEMENTS]),
            length_tree: Tree::new(length_lengths),
            aligned_tree: Tree::new(ALIGNED_LENGTHS.to_vec()),
            pretree: Tree::new(vec![5; PRETREE_ELEMENTS]),
            repeated: [1; 3],
            e8_filesize: None,
            header_written: false,
            last_stored_odd: false,
        }
    }

    /// Announce E8 call translation for a file of `filesize` bytes in the
    /// stream header. The data must already be translated; see [`e8_encode`].
    pub fn with_e8(mut self, filesize: u32) -> Self {
        self.e8_filesize = Some(filesize);
        self
    }

    /// Encode the blocks of one frame, padded to a whole word.
    pub fn encode_frame(&mut self, ops: &[LzxOp]) -> Vec<u8> {
        let mut w = BitWriter::default();
        if !self.header_written {
            match self.e8_filesize {
                Some(filesize) => {
                    w.put(1, 1);
                    w.put(filesize >> 16, 16);
                    w.put(filesize & 0xFFFF, 16);
                }
                None => w.put(0, 1),
            }
            self.header_written = true;
        }
        for op in ops {
            if self.last_stored_odd {
                w.raw(&[0]);
                self.last_stored_odd = false;
            }
            match op {
                LzxOp::Stored(data) => {
                    put_block_header(&mut w, 3, data.len());
                    w.align_for_stored();
                    for r in self.repeated {
                        w.raw(&r.to_le_bytes());
                    }
                    w.raw(data);
                    self.last_stored_odd = data.len() % 2 == 1;
                }
                LzxOp::Verbatim(tokens) => {
                    put_block_header(&mut w, 1, tokens.iter().map(LzxToken::output_len).sum());
                    self.put_trees(&mut w);
                    for token in tokens {
                        self.put_token(&mut w, token, false);
                    }
                }
                LzxOp::Aligned(tokens) => {
                    put_block_header(&mut w, 2, tokens.iter().map(LzxToken::output_len).sum());
                    for len in ALIGNED_LENGTHS {
                        w.put(u32::from(len), 3);
                    }
                    self.put_trees(&mut w);
                    for token in tokens {
                        self.put_token(&mut w, token, true);
                    }
                }
            }
        }
        // A pad byte after an odd stored block belongs to the next block.
        w.flush_word();
        w.out
    }

    fn put_trees(&mut self, w: &mut BitWriter) {
        let main = self.main_tree.lengths.clone();
        self.put_lengths(w, TreeField::Main, 0, &main[..256]);
        self.put_lengths(w, TreeField::Main, 256, &main[256..]);
        let lengths = self.length_tree.lengths.clone();
        self.put_lengths(w, TreeField::Length, 0, &lengths);
    }

    /// Write a pretree and the delta codes taking the previous lengths at
    /// `first..` to `target`.
    fn put_lengths(&mut self, w: &mut BitWriter, field: TreeField, first: usize, target: &[u8]) {
        for _ in 0..PRETREE_ELEMENTS {
            w.put(5, 4);
        }
        let prev = match field {
            TreeField::Main => &mut self.main_prev[first..first + target.len()],
            TreeField::Length => &mut self.length_prev[first..first + target.len()],
        };
        let delta = |old: u8, new: u8| (usize::from(old) + 17 - usize::from(new)) % 17;

        let mut x = 0;
        while x < target.len() {
            let value = target[x];
            let run = target[x..].iter().take_while(|&&t| t == value).count();
            if value == 0 && run >= 20 {
                let n = run.min(51);
                self.pretree.put(w, 18);
                w.put((n - 20) as u32, 5);
                x += n;
            } else if value == 0 && run >= 4 {
                let n = run.min(19);
                self.pretree.put(w, 17);
                w.put((n - 4) as u32, 4);
                x += n;
            } else if run >= 4 {
                let n = run.min(5);
                self.pretree.put(w, 19);
                w.put((n - 4) as u32, 1);
                self.pretree.put(w, delta(prev[x], value));
                x += n;
            } else {
                self.pretree.put(w, delta(prev[x], value));
                x += 1;
            }
        }
        prev.copy_from_slice(target);
    }

    fn put_main_and_length(&self, w: &mut BitWriter, slot: u32, len: usize) {
        assert!((2..=MAX_MATCH).contains(&len), "match length {len}");
        let header = (len - 2).min(7);
        self.main_tree.put(w, 256 + ((slot as usize) << 3) + header);
        if header == 7 {
            self.length_tree.put(w, len - 9);
        }
    }

    fn put_token(&mut self, w: &mut BitWriter, token: &LzxToken, aligned: bool) {
        match *token {
            LzxToken::Literal(b) => self.main_tree.put(w, usize::from(b)),
            LzxToken::Match { offset, len } => {
                assert!(offset >= 1);
                let formatted = offset + 2;
                let slot = (3..32)
                    .rev()
                    .find(|&s| position_base(s) <= formatted)
                    .expect("offset fits the window");
                self.put_main_and_length(w, slot, len);
                let extra = extra_bits(slot);
                let value = formatted - position_base(slot);
                if aligned && extra >= 3 {
                    w.put(value >> 3, extra - 3);
                    self.aligned_tree.put(w, (value & 7) as usize);
                } else {
                    w.put(value, extra);
                }
                self.repeated = [offset, self.repeated[0], self.repeated[1]];
            }
            LzxToken::Repeat { slot, len } => {
                assert!(slot < 3);
                self.put_main_and_length(w, slot as u32, len);
                self.repeated.swap(0, slot);
            }
        }
    }
}

#[derive(Clone, Copy)]
enum TreeField {
    Main,
    Length,
}

fn put_block_header(w: &mut BitWriter, kind: u32, len: usize) {
    w.put(kind, 3);
    w.put((len >> 8) as u32, 16);
    w.put((len & 0xFF) as u32, 8);
}

fn extra_bits(slot: u32) -> u32 {
    if slot < 4 { 0 } else { ((slot - 2) / 2).min(17) }
}

fn position_base(slot: u32) -> u32 {
    (0..slot).map(|s| 1u32 << extra_bits(s)).sum()
}

/// Encode a single frame with a fresh encoder.
pub fn encode_lzx_frame(ops: &[LzxOp], with_header: bool) -> Vec<u8> {
    let mut encoder = LzxEncoder::new();
    encoder.header_written = !with_header;
    encoder.encode_frame(ops)
}

/// The compressor half of E8 call translation: relative CALL targets in
/// `data` become absolute ones, frame by frame.
pub fn e8_encode(data: &mut [u8], filesize: u32) {
    let filesize = i64::from(filesize);
    for (frame_no, frame) in data.chunks_mut(FRAME_SIZE).enumerate() {
        if frame.len() <= 10 || frame_no >= 32768 {
            continue;
        }
        let start = (frame_no * FRAME_SIZE) as i64;
        let end = frame.len() - 10;
        let mut i = 0;
        while i < end {
            if frame[i] != 0xE8 {
                i += 1;
                continue;
            }
            let curpos = start + i as i64;
            let rel = i64::from(i32::from_le_bytes([
                frame[i + 1],
                frame[i + 2],
                frame[i + 3],
                frame[i + 4],
            ]));
            let abs = if (0..filesize).contains(&(rel + curpos)) {
                rel + curpos
            } else if (-curpos..0).contains(&(rel - filesize)) {
                rel - filesize
            } else {
                rel
            };
            frame[i + 1..i + 5].copy_from_slice(&(abs as i32).to_le_bytes());
            i += 5;
        }
    }
}

const MATCH_OFFSETS: [u32; 19] = [
    1, 2, 3, 4, 6, 8, 12, 16, 24, 32, 48, 64, 100, 128, 256, 512, 1024, 4096, 0x8000,
];

/// Greedy tokens for `stream[from..to]`, allowing matches back to `floor`.
fn greedy_tokens(stream: &[u8], floor: usize, from: usize, to: usize) -> Vec<LzxToken> {
    let mut tokens = Vec::new();
    let mut pos = from;
    while pos < to {
        let mut best = (0usize, 0u32);
        for &offset in &MATCH_OFFSETS {
            let offset_usize = offset as usize;
            if offset_usize > pos - floor {
                break;
            }
            let max = (to - pos).min(MAX_MATCH);
            let len = (0..max)
                .take_while(|&i| stream[pos + i] == stream[pos + i - offset_usize])
                .count();
            if len > best.0 {
                best = (len, offset);
            }
        }
        if best.0 >= 3 {
            tokens.push(LzxToken::Match {
                offset: best.1,
                len: best.0,
            });
            pos += best.0;
        } else {
            tokens.push(LzxToken::Literal(stream[pos]));
            pos += 1;
        }
    }
    tokens
}

/// Block layout used for each frame of a compressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LzxStyle {
    Verbatim,
    Aligned,
    Stored,
    /// Stored, verbatim and aligned frames in turn.
    Mixed,
}

/// The three section 1 objects for one compressed stream.
pub struct CompressedStream {
    pub control_data: Vec<u8>,
    pub reset_table: Vec<u8>,
    pub content: Vec<u8>,
}

/// Compress `data` into LZX frames, resetting every `reset_frames` frames.
pub fn compress_stream(data: &[u8], reset_frames: u32, style: LzxStyle) -> CompressedStream {
    compress_stream_with(data, reset_frames, style, None)
}

/// [`compress_stream`] with E8 call translation for a file of
/// `e8_filesize` bytes. `data` is the untranslated stream.
pub fn compress_stream_with(
    data: &[u8],
    reset_frames: u32,
    style: LzxStyle,
    e8_filesize: Option<u32>,
) -> CompressedStream {
    assert!(reset_frames >= 1);
    let mut translated;
    let data = match e8_filesize {
        Some(filesize) => {
            translated = data.to_vec();
            e8_encode(&mut translated, filesize);
            &translated[..]
        }
        None => data,
    };
    let new_encoder = || match e8_filesize {
        Some(filesize) => LzxEncoder::new().with_e8(filesize),
        None => LzxEncoder::new(),
    };

    let mut content = Vec::new();
    let mut offsets = Vec::new();
    let mut encoder = new_encoder();
    let mut group_start = 0;

    for (frame_no, start) in (0..data.len()).step_by(FRAME_SIZE).enumerate() {
        if frame_no % reset_frames as usize == 0 {
            encoder = new_encoder();
            group_start = start;
        }
        let end = (start + FRAME_SIZE).min(data.len());
        let style = match style {
            LzxStyle::Mixed => [LzxStyle::Stored, LzxStyle::Verbatim, LzxStyle::Aligned][frame_no % 3],
            other => other,
        };
        let op = match style {
            LzxStyle::Stored => LzxOp::Stored(data[start..end].to_vec()),
            LzxStyle::Aligned => LzxOp::Aligned(greedy_tokens(data, group_start, start, end)),
            _ => LzxOp::Verbatim(greedy_tokens(data, group_start, start, end)),
        };
        offsets.push(content.len() as u64);
        content.extend(encoder.encode_frame(&[op]));
    }

    let mut control_data = Vec::new();
    control_data.extend_from_slice(&6u32.to_le_bytes());
    control_data.extend_from_slice(b"LZXC");
    let window_units = (1u32 << WINDOW_BITS) / FRAME_SIZE as u32;
    for v in [2u32, reset_frames, window_units, 1, 0] {
        control_data.extend_from_slice(&v.to_le_bytes());
    }

    let mut reset_table = Vec::new();
    for v in [2u32, offsets.len() as u32, 8, 0x28] {
        reset_table.extend_from_slice(&v.to_le_bytes());
    }
    for v in [data.len() as u64, content.len() as u64, FRAME_SIZE as u64] {
        reset_table.extend_from_slice(&v.to_le_bytes());
    }
    for offset in &offsets {
        reset_table.extend_from_slice(&offset.to_le_bytes());
    }

    CompressedStream {
        control_data,
        reset_table,
        content,
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub section: u64,
    pub offset: u64,
    pub length: u64,
}

pub fn encode_encint(mut value: u64, out: &mut Vec<u8>) {
    let mut groups = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        groups.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    out.extend(groups.iter().rev());
}

fn encode_listing(entry: &ListingEntry) -> Vec<u8> {
    let mut out = Vec::new();
    encode_encint(entry.name.len() as u64, &mut out);
    out.extend_from_slice(entry.name.as_bytes());
    encode_encint(entry.section, &mut out);
    encode_encint(entry.offset, &mut out);
    encode_encint(entry.length, &mut out);
    out
}

fn quickref_interval(density: u32) -> usize {
    1 + (1usize << density)
}

/// Bytes at the end of a PMGL chunk taken by the quickref table.
fn quickref_space(entries: usize, density: u32) -> usize {
    2 + 2 * entries.div_ceil(quickref_interval(density)).saturating_sub(1)
}

/// Encode one PMGL chunk holding `entries` in the order given.
pub fn encode_pmgl_chunk(
    entries: &[ListingEntry],
    chunk_size: u32,
    density: u32,
    prev: i32,
    next: i32,
) -> Vec<u8> {
    let size = chunk_size as usize;
    let mut chunk = vec![0u8; size];
    chunk[0..4].copy_from_slice(b"PMGL");
    chunk[12..16].copy_from_slice(&prev.to_le_bytes());
    chunk[16..20].copy_from_slice(&next.to_le_bytes());

    let interval = quickref_interval(density);
    let mut pos = 20;
    let mut quickrefs = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 && i % interval == 0 {
            quickrefs.push((pos - 20) as u16);
        }
        let bytes = encode_listing(entry);
        chunk[pos..pos + bytes.len()].copy_from_slice(&bytes);
        pos += bytes.len();
    }
    assert!(
        pos + quickref_space(entries.len(), density) <= size,
        "entries overflow a {chunk_size} byte chunk"
    );

    chunk[4..8].copy_from_slice(&((size - pos) as u32).to_le_bytes());
    for (m, rel) in quickrefs.iter().enumerate() {
        let at = size - 2 - 2 * (m + 1);
        chunk[at..at + 2].copy_from_slice(&rel.to_le_bytes());
    }
    chunk[size - 2..].copy_from_slice(&(entries.len() as u16).to_le_bytes());
    chunk
}

/// Encode a PMGI chunk pointing at `(first name, chunk number)` children.
pub fn encode_pmgi_chunk(children: &[(String, u32)], chunk_size: u32) -> Vec<u8> {
    let size = chunk_size as usize;
    let mut body = Vec::new();
    for (name, chunk_no) in children {
        encode_encint(name.len() as u64, &mut body);
        body.extend_from_slice(name.as_bytes());
        encode_encint(u64::from(*chunk_no), &mut body);
    }
    assert!(8 + body.len() + 2 <= size, "index overflows a {chunk_size} byte chunk");
    let mut chunk = vec![0u8; size];
    chunk[0..4].copy_from_slice(b"PMGI");
    chunk[4..8].copy_from_slice(&((size - 8 - body.len()) as u32).to_le_bytes());
    chunk[8..8 + body.len()].copy_from_slice(&body);
    chunk[size - 2..].copy_from_slice(&(children.len() as u16).to_le_bytes());
    chunk
}

// ---------------------------------------------------------------------------
// Metadata streams
// ---------------------------------------------------------------------------

/// A `#SYSTEM` stream: version word, then `(code, length, data)` records.
pub fn system_stream(records: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut out = 3u32.to_le_bytes().to_vec();
    for (code, data) in records {
        out.extend_from_slice(&code.to_le_bytes());
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

/// A NUL terminated string record payload.
pub fn cstr(s: &str) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.push(0);
    out
}

/// The strings referenced by one `#WINDOWS` entry. Empty strings are left out.
#[derive(Debug, Clone, Default)]
pub struct WindowStrings {
    pub title: String,
    pub toc: String,
    pub index: String,
    pub home: String,
}

const WINDOW_ENTRY_LEN: usize = 0xC4;

/// Build `(#WINDOWS, #STRINGS)` for the given window definitions.
pub fn windows_streams(windows: &[WindowStrings]) -> (Vec<u8>, Vec<u8>) {
    // Offset 0 of #STRINGS is conventionally an empty string.
    let mut strings = vec![0u8];
    let mut intern = |s: &str| -> u32 {
        if s.is_empty() {
            return 0;
        }
        let at = strings.len() as u32;
        strings.extend_from_slice(s.as_bytes());
        strings.push(0);
        at
    };

    let mut out = Vec::new();
    out.extend_from_slice(&(windows.len() as u32).to_le_bytes());
    out.extend_from_slice(&(WINDOW_ENTRY_LEN as u32).to_le_bytes());
    for window in windows {
        let mut entry = vec![0u8; WINDOW_ENTRY_LEN];
        for (at, s) in [
            (0x14, &window.title),
            (0x60, &window.toc),
            (0x64, &window.index),
            (0x68, &window.home),
        ] {
            entry[at..at + 4].copy_from_slice(&intern(s).to_le_bytes());
        }
        out.extend_from_slice(&entry);
    }
    (out, strings)
}

/// A small sitemap document in the layout HTML Help Workshop writes.
pub fn sitemap(items: &[(usize, &str, &str)]) -> String {
    let mut out = String::from(
        "<!DOCTYPE HTML PUBLIC \"-//IETF//DTD HTML//EN\">\n<HTML>\n<HEAD>\n</HEAD><BODY>\n\
         <OBJECT type=\"text/site properties\">\n<param name=\"ImageType\" value=\"Folder\">\n</OBJECT>\n",
    );
    let mut depth = 0usize;
    for &(level, name, local) in items {
        while depth < level + 1 {
            out.push_str("<UL>\n");
            depth += 1;
        }
        while depth > level + 1 {
            out.push_str("</UL>\n");
            depth -= 1;
        }
        out.push_str(&format!(
            "<LI> <OBJECT type=\"text/sitemap\">\n\t<param name=\"Name\" value=\"{name}\">\n"
        ));
        if !local.is_empty() {
            out.push_str(&format!("\t<param name=\"Local\" value=\"{local}\">\n"));
        }
        out.push_str("\t</OBJECT>\n");
    }
    while depth > 0 {
        out.push_str("</UL>\n");
        depth -= 1;
    }
    out.push_str("</BODY></HTML>\n");
    out
}

// ---------------------------------------------------------------------------
// Whole archives
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Stored,
    Compressed,
}

/// Assembles a complete archive.
///
/// ```ignore
/// let bytes = ChmBuilder::new()
///     .compressed("/index.html", b"<html></html>")
///     .build();
/// ```
pub struct ChmBuilder {
    files: Vec<(String, Vec<u8>, Placement)>,
    itsf_version: u32,
    chunk_size: u32,
    density: u32,
    reset_frames: u32,
    style: LzxStyle,
    lang_id: u32,
}

impl Default for ChmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChmBuilder {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            itsf_version: 3,
            chunk_size: 0x1000,
            density: 2,
            reset_frames: 2,
            style: LzxStyle::Verbatim,
            lang_id: 0x409,
        }
    }

    /// Add an object to section 0.
    pub fn stored(mut self, path: &str, data: impl AsRef<[u8]>) -> Self {
        self.files
            .push((path.to_string(), data.as_ref().to_vec(), Placement::Stored));
        self
    }

    /// Add an object to the LZX compressed section.
    pub fn compressed(mut self, path: &str, data: impl AsRef<[u8]>) -> Self {
        self.files
            .push((path.to_string(), data.as_ref().to_vec(), Placement::Compressed));
        self
    }

    pub fn itsf_version(mut self, version: u32) -> Self {
        self.itsf_version = version;
        self
    }

    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn quickref_density(mut self, density: u32) -> Self {
        self.density = density;
        self
    }

    pub fn reset_frames(mut self, frames: u32) -> Self {
        self.reset_frames = frames;
        self
    }

    pub fn lzx_style(mut self, style: LzxStyle) -> Self {
        self.style = style;
        self
    }

    pub fn lang_id(mut self, lang_id: u32) -> Self {
        self.lang_id = lang_id;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut compressed_files: Vec<_> = self
            .files
            .iter()
            .filter(|(_, _, p)| *p == Placement::Compressed)
            .collect();
        compressed_files.sort_by(|a, b| compare_names(a.0.as_bytes(), b.0.as_bytes()));

        let mut entries = Vec::new();
        let mut section0 = Vec::new();
        let mut store = |name: &str, data: &[u8], entries: &mut Vec<ListingEntry>| {
            entries.push(ListingEntry {
                name: name.to_string(),
                section: 0,
                offset: section0.len() as u64,
                length: data.len() as u64,
            });
            section0.extend_from_slice(data);
        };

        for (name, data, placement) in &self.files {
            if *placement == Placement::Stored {
                store(name, data, &mut entries);
            }
        }

        if !compressed_files.is_empty() {
            let mut stream = Vec::new();
            for (name, data, _) in &compressed_files {
                entries.push(ListingEntry {
                    name: name.clone(),
                    section: 1,
                    offset: stream.len() as u64,
                    length: data.len() as u64,
                });
                stream.extend_from_slice(data);
            }
            let lzx = compress_stream(&stream, self.reset_frames, self.style);
            store(CONTROL_DATA_PATH, &lzx.control_data, &mut entries);
            store(RESET_TABLE_PATH, &lzx.reset_table, &mut entries);
            store(CONTENT_PATH, &lzx.content, &mut entries);
        }

        entries.sort_by(|a, b| compare_names(a.name.as_bytes(), b.name.as_bytes()));
        let directory = self.directory(&entries);

        let header_len = if self.itsf_version == 3 { 0x60 } else { 0x58 };
        let header_section_len = 0x18u64;
        let header_section_offset = header_len as u64;
        let dir_offset = header_section_offset + header_section_len;
        let data_offset = dir_offset + directory.len() as u64;
        let file_len = data_offset + section0.len() as u64;

        let mut out = vec![0u8; header_len];
        out[0..4].copy_from_slice(b"ITSF");
        out[4..8].copy_from_slice(&self.itsf_version.to_le_bytes());
        out[8..12].copy_from_slice(&(header_len as u32).to_le_bytes());
        out[12..16].copy_from_slice(&1u32.to_le_bytes());
        out[0x14..0x18].copy_from_slice(&self.lang_id.to_le_bytes());
        out[0x38..0x40].copy_from_slice(&header_section_offset.to_le_bytes());
        out[0x40..0x48].copy_from_slice(&header_section_len.to_le_bytes());
        out[0x48..0x50].copy_from_slice(&dir_offset.to_le_bytes());
        out[0x50..0x58].copy_from_slice(&(directory.len() as u64).to_le_bytes());
        if self.itsf_version == 3 {
            out[0x58..0x60].copy_from_slice(&data_offset.to_le_bytes());
        }

        let mut header_section = vec![0u8; header_section_len as usize];
        header_section[0..4].copy_from_slice(&0x01FEu32.to_le_bytes());
        header_section[8..16].copy_from_slice(&file_len.to_le_bytes());
        out.extend_from_slice(&header_section);
        out.extend_from_slice(&directory);
        out.extend_from_slice(&section0);
        out
    }

    fn directory(&self, entries: &[ListingEntry]) -> Vec<u8> {
        let capacity = self.chunk_size as usize - 20;
        let mut chunks: Vec<Vec<ListingEntry>> = vec![Vec::new()];
        let mut used = 0usize;
        for entry in entries {
            let len = encode_listing(entry).len();
            let current = chunks.last_mut().expect("at least one chunk");
            if !current.is_empty()
                && used + len + quickref_space(current.len() + 1, self.density) > capacity
            {
                chunks.push(vec![entry.clone()]);
                used = len;
            } else {
                current.push(entry.clone());
                used += len;
            }
        }

        let pmgl_count = chunks.len() as u32;
        let mut body = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let i = i as i32;
            let prev = if i == 0 { -1 } else { i - 1 };
            let next = if i as u32 + 1 == pmgl_count { -1 } else { i + 1 };
            body.extend(encode_pmgl_chunk(chunk, self.chunk_size, self.density, prev, next));
        }

        let (index_root, depth, num_chunks) = if pmgl_count > 1 {
            let children: Vec<_> = chunks
                .iter()
                .enumerate()
                .map(|(i, c)| (c[0].name.clone(), i as u32))
                .collect();
            body.extend(encode_pmgi_chunk(&children, self.chunk_size));
            (pmgl_count as i32, 2u32, pmgl_count + 1)
        } else {
            (-1, 1, 1)
        };

        let mut itsp = vec![0u8; 0x54];
        itsp[0..4].copy_from_slice(b"ITSP");
        let fields: [(usize, u32); 11] = [
            (0x04, 1),
            (0x08, 0x54),
            (0x0C, 10),
            (0x10, self.chunk_size),
            (0x14, self.density),
            (0x18, depth),
            (0x1C, index_root as u32),
            (0x20, 0),
            (0x24, pmgl_count - 1),
            (0x28, num_chunks),
            (0x30, self.lang_id),
        ];
        for (at, v) in fields {
            itsp[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        itsp[0x2C..0x30].copy_from_slice(&(-1i32).to_le_bytes());
        itsp.extend(body);
        itsp
    }
}

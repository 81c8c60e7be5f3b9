//! The MSCompressed content section: control data, reset table, and
//! random-access reads that decode only the frames covering a request.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::headers::{get_u32, get_u64};
use super::lzx::{FRAME_SIZE, LzxDecoder};
use crate::error::{Error, Result};
use crate::io::ByteSource;

pub const CONTROL_DATA_PATH: &str = "::DataSpace/Storage/MSCompressed/ControlData";
pub const RESET_TABLE_PATH: &str = "::DataSpace/Storage/MSCompressed/Transform/{7FC28940-9D31-11D0-9B27-00A0C91E9C7C}/InstanceData/ResetTable";
pub const CONTENT_PATH: &str = "::DataSpace/Storage/MSCompressed/Content";

const LZXC_SIGNATURE: &[u8; 4] = b"LZXC";
const RESET_TABLE_HEADER_LEN: usize = 0x28;

/// LZXC control data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlData {
    pub version: u32,
    /// Bytes of output between decoder resets.
    pub reset_interval: u32,
    /// LZX window size in bytes.
    pub window_size: u32,
    pub windows_per_reset: u32,
}

impl ControlData {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let field = |at| get_u32(data, at).ok_or_else(|| Error::malformed("LZXC control data truncated"));
        if data.get(4..8) != Some(&LZXC_SIGNATURE[..]) {
            return Err(Error::malformed("missing LZXC signature"));
        }
        let version = field(8)?;
        let (mut reset_interval, mut window_size) = (field(12)?, field(16)?);
        let windows_per_reset = field(20)?;
        match version {
            1 => {}
            2 => {
                reset_interval = reset_interval.saturating_mul(FRAME_SIZE as u32);
                window_size = window_size.saturating_mul(FRAME_SIZE as u32);
            }
            v => return Err(Error::malformed(format!("unsupported LZXC version {v}"))),
        }

        if !window_size.is_power_of_two() || !(1 << 15..=1 << 21).contains(&window_size) {
            return Err(Error::malformed(format!("LZX window size {window_size:#x}")));
        }
        if reset_interval == 0 || reset_interval as usize % FRAME_SIZE != 0 {
            return Err(Error::malformed(format!("LZX reset interval {reset_interval:#x}")));
        }

        Ok(Self {
            version,
            reset_interval,
            window_size,
            windows_per_reset,
        })
    }

    pub fn window_bits(&self) -> u32 {
        self.window_size.trailing_zeros()
    }

    /// Frames decoded between two resets.
    pub fn reset_frames(&self) -> u64 {
        u64::from(self.reset_interval) / FRAME_SIZE as u64
    }
}

/// Compressed offset of every frame, plus the stream lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetTable {
    pub uncompressed_len: u64,
    pub compressed_len: u64,
    pub block_len: u64,
    pub offsets: Vec<u64>,
}

impl ResetTable {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RESET_TABLE_HEADER_LEN {
            return Err(Error::malformed("reset table truncated"));
        }
        let truncated = || Error::malformed("reset table truncated");
        let block_count = get_u32(data, 4).ok_or_else(truncated)? as usize;
        let entry_size = get_u32(data, 8).ok_or_else(truncated)?;
        let table_offset = get_u32(data, 12).ok_or_else(truncated)? as usize;
        let uncompressed_len = get_u64(data, 16).ok_or_else(truncated)?;
        let compressed_len = get_u64(data, 24).ok_or_else(truncated)?;
        let block_len = get_u64(data, 32).ok_or_else(truncated)?;

        if entry_size != 8 {
            return Err(Error::malformed(format!("reset table entry size {entry_size}")));
        }
        if block_len != FRAME_SIZE as u64 {
            return Err(Error::malformed(format!("reset table block length {block_len:#x}")));
        }
        let needed_frames = uncompressed_len.div_ceil(block_len);
        if (block_count as u64) < needed_frames {
            return Err(Error::malformed(format!(
                "reset table lists {block_count} frames, stream needs {needed_frames}"
            )));
        }

        let room = data.len().saturating_sub(table_offset) / 8;
        if block_count > room {
            return Err(Error::malformed(format!(
                "reset table lists {block_count} frames but holds room for {room}"
            )));
        }

        let mut offsets = Vec::with_capacity(block_count);
        for i in 0..block_count {
            let at = table_offset
                .checked_add(i * 8)
                .ok_or_else(truncated)?;
            let offset = get_u64(data, at).ok_or_else(truncated)?;
            if offset > compressed_len || offsets.last().is_some_and(|&prev| offset < prev) {
                return Err(Error::malformed(format!("reset table entry {i} out of order")));
            }
            offsets.push(offset);
        }

        Ok(Self {
            uncompressed_len,
            compressed_len,
            block_len,
            offsets,
        })
    }

    fn frame_count(&self) -> u64 {
        self.uncompressed_len.div_ceil(self.block_len)
    }
}

/// Most recently decoded frames, keyed by frame index.
struct FrameCache {
    capacity: usize,
    frames: HashMap<u64, Arc<Vec<u8>>>,
    order: VecDeque<u64>,
}

impl FrameCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, frame: u64) -> Option<Arc<Vec<u8>>> {
        self.frames.get(&frame).cloned()
    }

    fn insert(&mut self, frame: u64, data: Arc<Vec<u8>>) {
        if self.capacity == 0 || self.frames.contains_key(&frame) {
            return;
        }
        while self.frames.len() >= self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.frames.remove(&old);
                }
                None => break,
            }
        }
        self.frames.insert(frame, data);
        self.order.push_back(frame);
    }
}

/// Section 1 of an archive.
pub struct LzxSection {
    control: ControlData,
    table: ResetTable,
    /// Absolute file offset of the compressed content stream.
    content_offset: u64,
    cache: Mutex<FrameCache>,
}

impl LzxSection {
    pub fn new(
        control: ControlData,
        table: ResetTable,
        content_offset: u64,
        content_len: u64,
        cache_frames: usize,
    ) -> Result<Self> {
        if table.compressed_len > content_len {
            return Err(Error::malformed(format!(
                "reset table claims {} compressed bytes, content holds {content_len}",
                table.compressed_len
            )));
        }
        debug!(
            window = control.window_size,
            reset_frames = control.reset_frames(),
            frames = table.frame_count(),
            "prepared LZX section"
        );
        Ok(Self {
            control,
            table,
            content_offset,
            cache: Mutex::new(FrameCache::new(cache_frames)),
        })
    }

    pub fn control(&self) -> &ControlData {
        &self.control
    }

    pub fn reset_table(&self) -> &ResetTable {
        &self.table
    }

    /// Read `length` uncompressed bytes starting at `offset`.
    pub fn read(&self, source: &dyn ByteSource, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= self.table.uncompressed_len)
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "range {offset}+{length} exceeds compressed section of {} bytes",
                    self.table.uncompressed_len
                ))
            })?;

        let frame_len = FRAME_SIZE as u64;
        let first = offset / frame_len;
        let last = (end - 1) / frame_len;
        let mut out = Vec::with_capacity(length as usize);

        if let Some(frames) = self.cached_frames(first, last) {
            trace!(first, last, "frames served from cache");
            for (frame_no, frame) in (first..=last).zip(frames) {
                append_overlap(&mut out, &frame, frame_no * frame_len, offset, end);
            }
            return Ok(out);
        }

        let reset_frames = self.control.reset_frames();
        let start = first - first % reset_frames;
        trace!(start, first, last, "decoding LZX frames");

        let input_start = self.frame_offset(start)?;
        let input_end = self.frame_end(last)?;
        let input = source.read_at(
            self.content_offset + input_start,
            (input_end - input_start) as usize,
        )?;

        let mut decoder = LzxDecoder::new(self.control.window_bits())?;
        for frame_no in start..=last {
            if frame_no % reset_frames == 0 {
                decoder.reset();
            }
            let rel = (self.frame_offset(frame_no)? - input_start) as usize;
            let size = (self.table.uncompressed_len - frame_no * frame_len).min(frame_len) as usize;
            let frame = Arc::new(decoder.decode_frame(&input[rel..], size, frame_no * frame_len)?);

            if frame_no >= first {
                append_overlap(&mut out, &frame, frame_no * frame_len, offset, end);
            }
            self.cache.lock().insert(frame_no, frame);
        }
        Ok(out)
    }

    fn cached_frames(&self, first: u64, last: u64) -> Option<Vec<Arc<Vec<u8>>>> {
        let cache = self.cache.lock();
        (first..=last).map(|n| cache.get(n)).collect()
    }

    fn frame_offset(&self, frame: u64) -> Result<u64> {
        self.table
            .offsets
            .get(frame as usize)
            .copied()
            .ok_or_else(|| Error::corrupt(format!("frame {frame} missing from reset table")))
    }

    fn frame_end(&self, frame: u64) -> Result<u64> {
        match self.table.offsets.get(frame as usize + 1) {
            Some(&next) => Ok(next),
            None => Ok(self.table.compressed_len),
        }
    }
}

/// Append the part of `frame` (starting at stream position `frame_start`)
/// that falls inside `[from, to)`.
fn append_overlap(out: &mut Vec<u8>, frame: &[u8], frame_start: u64, from: u64, to: u64) {
    let frame_end = frame_start + frame.len() as u64;
    let lo = from.max(frame_start);
    let hi = to.min(frame_end);
    if lo < hi {
        out.extend_from_slice(&frame[(lo - frame_start) as usize..(hi - frame_start) as usize]);
    }
}

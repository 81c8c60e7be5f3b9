//! PMGL/PMGI directory chunks: path lookup and enumeration.
//!
//! Lookups descend from the PMGI root to one listing chunk and search only
//! that chunk. Inside a chunk the quickref table narrows the scan to one
//! stretch of entries; a full chunk scan backs it up for archives whose
//! quickref or sort order cannot be trusted.

use std::cmp::Ordering;

use tracing::trace;

use super::headers::{ItspHeader, le_i32, le_u16, le_u32, read_encint};
use crate::error::{Error, Result};
use crate::io::ByteSource;

const PMGL_SIGNATURE: &[u8; 4] = b"PMGL";
const PMGI_SIGNATURE: &[u8; 4] = b"PMGI";
const PMGL_ENTRIES_OFFSET: usize = 20;
const PMGI_ENTRIES_OFFSET: usize = 8;
/// Deepest PMGI nesting followed before the directory is declared cyclic.
const MAX_INDEX_DEPTH: usize = 16;

/// Content section number of stored (uncompressed) objects.
pub const SECTION_UNCOMPRESSED: u64 = 0;
/// Content section number of LZX compressed objects.
pub const SECTION_MSCOMPRESSED: u64 = 1;

/// One named object listed in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub path: String,
    pub section: u64,
    /// Offset inside the section (uncompressed offset for section 1).
    pub offset: u64,
    /// Length in bytes after decompression.
    pub length: u64,
}

impl DirectoryEntry {
    /// Directory-only entries (the name ends with `/`) carry no data.
    pub fn is_dir(&self) -> bool {
        self.path.ends_with('/')
    }
}

/// The directory chunks that follow the ITSP header.
#[derive(Debug, Clone)]
pub struct Directory {
    header: ItspHeader,
    chunks_offset: u64,
}

impl Directory {
    pub fn new(header: ItspHeader, chunks_offset: u64) -> Self {
        Self {
            header,
            chunks_offset,
        }
    }

    pub fn header(&self) -> &ItspHeader {
        &self.header
    }

    /// Find the entry for `path` (already normalized), if any.
    pub fn lookup(&self, source: &dyn ByteSource, path: &str) -> Result<Option<DirectoryEntry>> {
        let target = path.as_bytes();

        let Some(root) = self.header.index_root else {
            return self.lookup_in_chain(source, target);
        };

        let mut chunk_no = root;
        for _ in 0..MAX_INDEX_DEPTH {
            let chunk = self.read_chunk(source, chunk_no)?;
            match &chunk[0..4] {
                sig if sig == PMGI_SIGNATURE => match self.search_pmgi(&chunk, target)? {
                    Some(next) => chunk_no = next,
                    None => return Ok(None),
                },
                sig if sig == PMGL_SIGNATURE => return self.search_pmgl(&chunk, target),
                _ => {
                    return Err(Error::malformed(format!(
                        "directory chunk {chunk_no} has no PMGL/PMGI signature"
                    )));
                }
            }
        }
        Err(Error::malformed("directory index nests too deeply"))
    }

    /// Every entry in listing order, following the PMGL chain.
    pub fn entries(&self, source: &dyn ByteSource) -> Result<Vec<DirectoryEntry>> {
        let mut out = Vec::new();
        self.walk_chain(source, |chunk| {
            let mut pos = PMGL_ENTRIES_OFFSET;
            let end = pmgl_entries_end(chunk)?;
            while pos < end {
                let (entry, next) = parse_pmgl_entry(chunk, pos, end)?;
                out.push(entry);
                pos = next;
            }
            Ok(false)
        })?;
        Ok(out)
    }

    fn lookup_in_chain(&self, source: &dyn ByteSource, target: &[u8]) -> Result<Option<DirectoryEntry>> {
        let mut found = None;
        self.walk_chain(source, |chunk| {
            found = self.search_pmgl(chunk, target)?;
            Ok(found.is_some())
        })?;
        Ok(found)
    }

    /// Visit PMGL chunks from the first listing chunk until `visit` returns
    /// true or the chain ends.
    fn walk_chain(
        &self,
        source: &dyn ByteSource,
        mut visit: impl FnMut(&[u8]) -> Result<bool>,
    ) -> Result<()> {
        let mut chunk_no = Some(self.header.first_pmgl);
        let mut visited = 0u32;
        while let Some(n) = chunk_no {
            if visited > self.header.num_chunks {
                return Err(Error::malformed("PMGL chain loops"));
            }
            visited += 1;

            let chunk = self.read_chunk(source, n)?;
            if &chunk[0..4] != PMGL_SIGNATURE {
                return Err(Error::malformed(format!("chunk {n} is not a PMGL chunk")));
            }
            if visit(&chunk)? {
                return Ok(());
            }
            let next = le_i32(&chunk, 16);
            chunk_no = (next >= 0 && (next as u32) < self.header.num_chunks).then_some(next as u32);
        }
        Ok(())
    }

    fn read_chunk(&self, source: &dyn ByteSource, n: u32) -> Result<Vec<u8>> {
        if n >= self.header.num_chunks {
            return Err(Error::malformed(format!(
                "chunk {n} outside directory of {} chunks",
                self.header.num_chunks
            )));
        }
        let size = self.header.chunk_size as usize;
        let offset = self.chunks_offset + u64::from(n) * u64::from(self.header.chunk_size);
        Ok(source.read_at(offset, size)?)
    }

    fn quickref_density(&self) -> usize {
        1 + (1usize << self.header.quickref_density.min(16))
    }

    /// Child chunk of the last index entry whose name sorts at or before `target`.
    fn search_pmgi(&self, chunk: &[u8], target: &[u8]) -> Result<Option<u32>> {
        let end = entries_end(chunk, PMGI_ENTRIES_OFFSET)?;
        let mut pos = PMGI_ENTRIES_OFFSET;
        let mut candidate = None;
        while pos < end {
            let (name, after_name) = read_name(chunk, pos, end)?;
            let mut p = after_name;
            let child = read_encint(chunk, &mut p)
                .ok_or_else(|| Error::malformed("truncated PMGI entry"))?;
            if compare_names(name, target) == Ordering::Greater {
                break;
            }
            candidate = Some(
                u32::try_from(child).map_err(|_| Error::malformed("PMGI child chunk overflows"))?,
            );
            pos = p;
        }
        Ok(candidate)
    }

    fn search_pmgl(&self, chunk: &[u8], target: &[u8]) -> Result<Option<DirectoryEntry>> {
        let end = pmgl_entries_end(chunk)?;

        if let Some((start, limit)) = self.quickref_window(chunk, target, end) {
            let mut pos = start;
            for _ in 0..limit {
                if pos >= end {
                    break;
                }
                let (name, _) = read_name(chunk, pos, end)?;
                match compare_names(name, target) {
                    Ordering::Equal => return parse_pmgl_entry(chunk, pos, end).map(|(e, _)| Some(e)),
                    Ordering::Greater => break,
                    Ordering::Less => pos = parse_pmgl_entry(chunk, pos, end)?.1,
                }
            }
            trace!("quickref window missed, scanning whole chunk");
        }

        let mut pos = PMGL_ENTRIES_OFFSET;
        while pos < end {
            let (name, _) = read_name(chunk, pos, end)?;
            let is_match = compare_names(name, target) == Ordering::Equal;
            let (entry, next) = parse_pmgl_entry(chunk, pos, end)?;
            if is_match {
                return Ok(Some(entry));
            }
            pos = next;
        }
        Ok(None)
    }

    /// Binary search the quickref table. Returns the offset of the entry to
    /// start scanning from and how many entries that stretch holds, or `None`
    /// when the table is absent or inconsistent with the chunk.
    fn quickref_window(&self, chunk: &[u8], target: &[u8], end: usize) -> Option<(usize, usize)> {
        let size = chunk.len();
        let entry_count = usize::from(le_u16(chunk, size - 2));
        let density = self.quickref_density();
        let qr_entries = entry_count.div_ceil(density);
        if qr_entries == 0 {
            return None;
        }
        let free_space = le_u32(chunk, 4) as usize;
        // Count word plus one offset word per quickref point after the first.
        if 2 + 2 * (qr_entries - 1) > free_space {
            return None;
        }

        let offset_of = |m: usize| -> Option<usize> {
            let rel = if m == 0 {
                0
            } else {
                usize::from(le_u16(chunk, size - 2 - 2 * m))
            };
            let abs = PMGL_ENTRIES_OFFSET + rel;
            (abs < end).then_some(abs)
        };

        let (mut lo, mut hi) = (0usize, qr_entries - 1);
        let mut best = 0usize;
        while lo <= hi {
            let mid = (lo + hi) / 2;
            let (name, _) = read_name(chunk, offset_of(mid)?, end).ok()?;
            match compare_names(name, target) {
                Ordering::Equal => {
                    best = mid;
                    break;
                }
                Ordering::Less => {
                    best = mid;
                    lo = mid + 1;
                }
                Ordering::Greater => {
                    if mid == 0 {
                        return None;
                    }
                    hi = mid - 1;
                }
            }
        }

        let remaining = entry_count - best * density;
        Some((offset_of(best)?, remaining.min(density)))
    }
}

/// Compare directory names the way the compiler sorts them: ASCII case-insensitive.
pub fn compare_names(a: &[u8], b: &[u8]) -> Ordering {
    a.iter()
        .map(u8::to_ascii_lowercase)
        .cmp(b.iter().map(u8::to_ascii_lowercase))
}

fn pmgl_entries_end(chunk: &[u8]) -> Result<usize> {
    entries_end(chunk, PMGL_ENTRIES_OFFSET)
}

fn entries_end(chunk: &[u8], entries_offset: usize) -> Result<usize> {
    let free_space = le_u32(chunk, 4) as usize;
    chunk
        .len()
        .checked_sub(free_space)
        .filter(|&end| end >= entries_offset)
        .ok_or_else(|| Error::malformed(format!("chunk free space {free_space} exceeds chunk")))
}

fn read_name(chunk: &[u8], pos: usize, end: usize) -> Result<(&[u8], usize)> {
    let mut p = pos;
    let len = read_encint(chunk, &mut p)
        .and_then(|l| usize::try_from(l).ok())
        .ok_or_else(|| Error::malformed("truncated directory entry name length"))?;
    let name_end = p
        .checked_add(len)
        .filter(|&e| e <= end)
        .ok_or_else(|| Error::malformed("directory entry name runs past chunk"))?;
    Ok((&chunk[p..name_end], name_end))
}

fn parse_pmgl_entry(chunk: &[u8], pos: usize, end: usize) -> Result<(DirectoryEntry, usize)> {
    let (name, mut p) = read_name(chunk, pos, end)?;
    let mut field = || {
        read_encint(chunk, &mut p).ok_or_else(|| Error::malformed("truncated PMGL entry"))
    };
    let section = field()?;
    let offset = field()?;
    let length = field()?;
    if p > end {
        return Err(Error::malformed("PMGL entry runs into quickref area"));
    }
    Ok((
        DirectoryEntry {
            path: String::from_utf8_lossy(name).into_owned(),
            section,
            offset,
            length,
        },
        p,
    ))
}

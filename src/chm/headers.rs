//! ITSF / ITSP header parsing and the little-endian field readers shared by
//! the rest of the format layer.

use crate::error::{Error, Result};

pub const ITSF_SIGNATURE: &[u8; 4] = b"ITSF";
pub const ITSP_SIGNATURE: &[u8; 4] = b"ITSP";

pub const ITSF_V2_LEN: usize = 0x58;
pub const ITSF_V3_LEN: usize = 0x60;
pub const ITSP_LEN: usize = 0x54;

/// File header at offset 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItsfHeader {
    pub version: u32,
    pub header_len: u32,
    pub timestamp: u32,
    pub lang_id: u32,
    pub dir_offset: u64,
    pub dir_len: u64,
    /// Start of section 0; every stored object offset is relative to this.
    pub data_offset: u64,
}

impl ItsfHeader {
    pub fn parse(data: &[u8], file_len: u64) -> Result<Self> {
        if data.len() < ITSF_V2_LEN {
            return Err(Error::malformed("file too short for ITSF header"));
        }
        if &data[0..4] != ITSF_SIGNATURE {
            return Err(Error::malformed("missing ITSF signature"));
        }

        let version = le_u32(data, 4);
        let header_len = le_u32(data, 8);
        let expected_len = match version {
            2 => ITSF_V2_LEN,
            3 => ITSF_V3_LEN,
            v => return Err(Error::malformed(format!("unsupported ITSF version {v}"))),
        };
        if header_len as usize != expected_len || data.len() < expected_len {
            return Err(Error::malformed(format!(
                "ITSF v{version} header length {header_len}, expected {expected_len}"
            )));
        }

        let dir_offset = le_u64(data, 0x48);
        let dir_len = le_u64(data, 0x50);
        let data_offset = if version == 3 {
            le_u64(data, 0x58)
        } else {
            dir_offset.saturating_add(dir_len)
        };

        let dir_end = dir_offset
            .checked_add(dir_len)
            .ok_or_else(|| Error::malformed("directory range overflows"))?;
        if dir_end > file_len {
            return Err(Error::malformed(format!(
                "directory ends at {dir_end}, past end of file ({file_len})"
            )));
        }
        if data_offset > file_len {
            return Err(Error::malformed(format!(
                "content offset {data_offset} past end of file ({file_len})"
            )));
        }

        Ok(Self {
            version,
            header_len,
            timestamp: le_u32(data, 0x10),
            lang_id: le_u32(data, 0x14),
            dir_offset,
            dir_len,
            data_offset,
        })
    }
}

/// Directory header at `dir_offset`, followed by the directory chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItspHeader {
    pub header_len: u32,
    /// Size of every PMGL/PMGI chunk.
    pub chunk_size: u32,
    /// Quickref entries are placed every `1 + (1 << density)` entries.
    pub quickref_density: u32,
    pub index_depth: u32,
    /// Root PMGI chunk, `None` when the directory has a single listing level.
    pub index_root: Option<u32>,
    pub first_pmgl: u32,
    pub last_pmgl: u32,
    pub num_chunks: u32,
    pub lang_id: u32,
}

impl ItspHeader {
    pub fn parse(data: &[u8], dir_len: u64) -> Result<Self> {
        if data.len() < ITSP_LEN {
            return Err(Error::malformed("directory too short for ITSP header"));
        }
        if &data[0..4] != ITSP_SIGNATURE {
            return Err(Error::malformed("missing ITSP signature"));
        }
        let version = le_u32(data, 4);
        if version != 1 {
            return Err(Error::malformed(format!("unsupported ITSP version {version}")));
        }
        let header_len = le_u32(data, 8);
        if header_len as usize != ITSP_LEN {
            return Err(Error::malformed(format!("ITSP header length {header_len}")));
        }

        let chunk_size = le_u32(data, 0x10);
        if chunk_size < 0x20 {
            return Err(Error::malformed(format!("directory chunk size {chunk_size}")));
        }
        let num_chunks = le_u32(data, 0x28);
        let needed = u64::from(header_len) + u64::from(chunk_size) * u64::from(num_chunks);
        if needed > dir_len {
            return Err(Error::malformed(format!(
                "{num_chunks} chunks of {chunk_size} bytes do not fit in directory of {dir_len}"
            )));
        }

        let index_root = match le_i32(data, 0x1C) {
            n if n >= 0 && (n as u32) < num_chunks => Some(n as u32),
            _ => None,
        };
        let first_pmgl = le_i32(data, 0x20);
        let last_pmgl = le_i32(data, 0x24);
        // Some compilers leave these at -1 for single-chunk directories.
        let first_pmgl = if first_pmgl < 0 { 0 } else { first_pmgl as u32 };
        let last_pmgl = if last_pmgl < 0 {
            num_chunks.saturating_sub(1)
        } else {
            (last_pmgl as u32).min(num_chunks.saturating_sub(1))
        };
        if num_chunks == 0 || first_pmgl >= num_chunks {
            return Err(Error::malformed("first PMGL chunk outside directory"));
        }

        Ok(Self {
            header_len,
            chunk_size,
            quickref_density: le_u32(data, 0x14),
            index_depth: le_u32(data, 0x18),
            index_root,
            first_pmgl,
            last_pmgl,
            num_chunks,
            lang_id: le_u32(data, 0x30),
        })
    }
}

/// Decode an ENCINT (big-endian base-128, high bit = continue) at `*pos`.
pub fn read_encint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value: u64 = 0;
    for _ in 0..10 {
        let byte = *data.get(*pos)?;
        *pos += 1;
        value = value.checked_shl(7)? | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

pub(crate) fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

pub(crate) fn le_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

pub(crate) fn le_i32(data: &[u8], at: usize) -> i32 {
    le_u32(data, at) as i32
}

pub(crate) fn le_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Bounds-checked `le_u32`, for fields inside streams of untrusted length.
pub(crate) fn get_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at.checked_add(4)?).map(|_| le_u32(data, at))
}

pub(crate) fn get_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at.checked_add(8)?).map(|_| le_u64(data, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(mut value: u64) -> Vec<u8> {
        let mut out = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            out.push(0x80 | (value & 0x7F) as u8);
            value >>= 7;
        }
        out.reverse();
        out
    }

    #[test]
    fn test_encint_single_and_multi_byte() {
        let mut pos = 0;
        assert_eq!(read_encint(&[0x05], &mut pos), Some(5));
        assert_eq!(pos, 1);

        let mut pos = 0;
        assert_eq!(read_encint(&[0x81, 0x00], &mut pos), Some(128));
        assert_eq!(pos, 2);
    }

    #[test]
    fn test_encint_truncated() {
        let mut pos = 0;
        assert_eq!(read_encint(&[0x81, 0x82], &mut pos), None);
    }

    proptest! {
        #[test]
        fn prop_encint_decodes_what_was_encoded(value in any::<u32>(), tail in any::<u8>()) {
            let mut bytes = encode(u64::from(value));
            let len = bytes.len();
            bytes.push(tail);
            let mut pos = 0;
            prop_assert_eq!(read_encint(&bytes, &mut pos), Some(u64::from(value)));
            prop_assert_eq!(pos, len);
        }
    }

    fn itsf(version: u32, dir_offset: u64, dir_len: u64) -> Vec<u8> {
        let len = if version == 3 { ITSF_V3_LEN } else { ITSF_V2_LEN };
        let mut data = vec![0u8; len];
        data[0..4].copy_from_slice(ITSF_SIGNATURE);
        data[4..8].copy_from_slice(&version.to_le_bytes());
        data[8..12].copy_from_slice(&(len as u32).to_le_bytes());
        data[0x14..0x18].copy_from_slice(&0x409u32.to_le_bytes());
        data[0x48..0x50].copy_from_slice(&dir_offset.to_le_bytes());
        data[0x50..0x58].copy_from_slice(&dir_len.to_le_bytes());
        if version == 3 {
            data[0x58..0x60].copy_from_slice(&(dir_offset + dir_len).to_le_bytes());
        }
        data
    }

    #[test]
    fn test_itsf_v2_derives_content_offset() {
        let header = ItsfHeader::parse(&itsf(2, 0x58, 0x100), 0x1000).unwrap();
        assert_eq!(header.dir_offset, 0x58);
        assert_eq!(header.data_offset, 0x158);
        assert_eq!(header.lang_id, 0x409);
    }

    #[test]
    fn test_itsf_rejects_bad_signature_and_bounds() {
        let mut data = itsf(3, 0x60, 0x100);
        assert!(ItsfHeader::parse(&data, 0x1000).is_ok());

        assert!(matches!(
            ItsfHeader::parse(&data, 0x80),
            Err(Error::MalformedArchive(_))
        ));

        data[0] = b'X';
        assert!(matches!(
            ItsfHeader::parse(&data, 0x1000),
            Err(Error::MalformedArchive(_))
        ));
    }

    #[test]
    fn test_itsf_rejects_unknown_version() {
        let mut data = itsf(3, 0x60, 0x100);
        data[4..8].copy_from_slice(&4u32.to_le_bytes());
        assert!(matches!(
            ItsfHeader::parse(&data, 0x1000),
            Err(Error::MalformedArchive(_))
        ));
    }
}

//! The ITSF container format used by compiled HTML Help files.
//!
//! An archive is laid out as:
//!
//! ```text
//! ITSF header | header section 0 | ITSP header + PMGL/PMGI chunks | section 0 data
//! ```
//!
//! Section 0 holds stored objects. Section 1 ("MSCompressed") is itself made
//! of three section 0 objects: LZXC control data, a reset table with the
//! compressed offset of every 32 KiB frame, and the LZX compressed content.

pub mod directory;
pub mod headers;
pub mod lzx;
pub mod section;

pub use directory::{
    Directory, DirectoryEntry, SECTION_MSCOMPRESSED, SECTION_UNCOMPRESSED, compare_names,
};
pub use headers::{ItsfHeader, ItspHeader, read_encint};
pub use lzx::{FRAME_SIZE, LzxDecoder};
pub use section::{ControlData, LzxSection, ResetTable};

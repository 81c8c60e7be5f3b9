//! # chmkit
//!
//! A reader for Microsoft Compiled HTML Help (`.chm`) archives, plus a
//! registry that routes virtual paths to whichever archives are open.
//!
//! ## Features
//!
//! - ITSF/ITSP header validation and PMGI/PMGL directory lookup
//! - Stored and LZX compressed objects, decoded from the nearest reset point
//! - Title, home page, contents and index paths from `#SYSTEM` and `#WINDOWS`
//! - Table of contents and keyword index trees from `.hhc`/`.hhk` sitemaps
//! - `chm://<id>/<path>` resolution across concurrently open archives
//!
//! ## Quick Start
//!
//! ```no_run
//! use chmkit::{Archive, ArchiveRegistry, TableOfContents};
//!
//! let archive = Archive::open("help.chm").unwrap();
//! println!("{:?}", archive.title());
//!
//! let page = archive.read_object("/index.html").unwrap();
//! let toc = TableOfContents::build(&archive).unwrap();
//! for (depth, topic) in &toc {
//!     println!("{}{}", "  ".repeat(depth), topic.name);
//! }
//!
//! let registry = ArchiveRegistry::default();
//! registry.register(&archive).unwrap();
//! let url = registry.url_for("/index.html", &archive);
//! let resource = registry.resolve_url(&url).unwrap();
//! assert_eq!(resource.data, page);
//! registry.release(&archive);
//! ```

pub mod archive;
pub mod chm;
pub mod error;
pub mod io;
pub mod metadata;
pub mod registry;
pub mod toc;
pub(crate) mod util;

#[doc(hidden)]
pub mod test_helpers;

pub use archive::{Archive, ContentSource, ReaderOptions};
pub use chm::DirectoryEntry;
pub use error::{Error, Result};
pub use metadata::Metadata;
pub use registry::{ArchiveRegistry, Resource, VirtualPath};
pub use toc::{SitemapDecoder, TableOfContents, TocDecoder, Topic};
pub use util::{MediaFormat, detect_media_format};

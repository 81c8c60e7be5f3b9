//! Opened CHM archives.
//!
//! An [`Archive`] validates the container headers at open time, loads the
//! metadata streams once, and then serves named objects on demand. It is
//! shared as `Arc<Archive>` and is safe to read from several threads at
//! once: every read decodes with its own LZX state, and the only shared
//! mutable state is the decoded frame cache.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::chm::headers::{ITSF_V2_LEN, ITSF_V3_LEN, ITSP_LEN};
use crate::chm::section::{CONTENT_PATH, CONTROL_DATA_PATH, RESET_TABLE_PATH};
use crate::chm::{
    ControlData, Directory, DirectoryEntry, ItsfHeader, ItspHeader, LzxSection, ResetTable,
    SECTION_MSCOMPRESSED, SECTION_UNCOMPRESSED,
};
use crate::error::{Error, Result};
use crate::io::{ByteSource, FileSource};
use crate::metadata::Metadata;
use crate::util::{decode_text, time_seed_nanos};

/// Default number of decoded 32 KiB frames kept per archive.
pub const DEFAULT_FRAME_CACHE_FRAMES: usize = 8;
/// Default ceiling on the declared length of a single object.
pub const DEFAULT_MAX_OBJECT_LEN: u64 = 512 * 1024 * 1024;

/// Named-object access shared by archives and anything standing in for one.
pub trait ContentSource {
    /// True iff the directory lists `path`.
    fn has_object(&self, path: &str) -> bool;

    /// The complete contents of the object at `path`.
    fn read_object(&self, path: &str) -> Result<Vec<u8>>;
}

/// Options for opening an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    pub frame_cache_frames: usize,
    pub max_object_len: u64,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            frame_cache_frames: DEFAULT_FRAME_CACHE_FRAMES,
            max_object_len: DEFAULT_MAX_OBJECT_LEN,
        }
    }
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded frames to keep around for later reads (0 disables the cache).
    pub fn with_frame_cache_frames(mut self, frames: usize) -> Self {
        self.frame_cache_frames = frames;
        self
    }

    /// Refuse objects whose directory entry claims more than `len` bytes.
    pub fn with_max_object_len(mut self, len: u64) -> Self {
        self.max_object_len = len;
        self
    }
}

static OPEN_SERIAL: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier for one opened archive: 40 hex characters.
fn generate_unique_id(path: &Path, file_len: u64) -> String {
    let serial = OPEN_SERIAL.fetch_add(1, Ordering::Relaxed);
    let mut digest = sha1_smol::Sha1::new();
    digest.update(path.as_os_str().as_encoded_bytes());
    digest.update(&file_len.to_le_bytes());
    digest.update(&serial.to_le_bytes());
    digest.update(&time_seed_nanos().to_le_bytes());
    digest.digest().to_string()
}

/// Add the leading `/` that directory names carry, unless the path names an
/// internal `::` stream.
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    if path.starts_with('/') || path.starts_with("::") {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(format!("/{path}"))
    }
}

/// A compiled HTML Help file opened for reading.
pub struct Archive {
    unique_id: String,
    path: PathBuf,
    source: RwLock<Option<Arc<dyn ByteSource>>>,
    itsf: ItsfHeader,
    directory: Directory,
    options: ReaderOptions,
    lzx: Mutex<Option<Arc<LzxSection>>>,
    metadata: Metadata,
    home_path: Option<String>,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("unique_id", &self.unique_id)
            .field("path", &self.path)
            .field("title", &self.metadata.title)
            .field("home_path", &self.home_path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Open the archive at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::open_with(path, ReaderOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let source = FileSource::open(path)?;
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self::from_source(Arc::new(source), path, options)
    }

    /// Open an archive over any byte source, e.g. a [`MemorySource`](crate::io::MemorySource).
    pub fn from_source(
        source: Arc<dyn ByteSource>,
        path: impl Into<PathBuf>,
        options: ReaderOptions,
    ) -> Result<Arc<Self>> {
        Self::load(source, path.into(), options, None)
    }

    /// Like [`Archive::from_source`] with a caller-chosen id.
    #[cfg(test)]
    pub(crate) fn from_source_with_id(
        source: Arc<dyn ByteSource>,
        path: impl Into<PathBuf>,
        options: ReaderOptions,
        unique_id: &str,
    ) -> Result<Arc<Self>> {
        Self::load(source, path.into(), options, Some(unique_id.to_string()))
    }

    fn load(
        source: Arc<dyn ByteSource>,
        path: PathBuf,
        options: ReaderOptions,
        unique_id: Option<String>,
    ) -> Result<Arc<Self>> {
        let file_len = source.len();
        if file_len < ITSF_V2_LEN as u64 {
            return Err(Error::malformed(format!(
                "file of {file_len} bytes is too short for an ITSF header"
            )));
        }

        let head = source.read_at(0, (ITSF_V3_LEN as u64).min(file_len) as usize)?;
        let itsf = ItsfHeader::parse(&head, file_len)?;
        if itsf.dir_len < ITSP_LEN as u64 {
            return Err(Error::malformed(format!("directory of {} bytes", itsf.dir_len)));
        }
        let itsp = ItspHeader::parse(&source.read_at(itsf.dir_offset, ITSP_LEN)?, itsf.dir_len)?;
        let chunks_offset = itsf.dir_offset + u64::from(itsp.header_len);
        debug!(
            path = %path.display(),
            version = itsf.version,
            chunk_size = itsp.chunk_size,
            chunks = itsp.num_chunks,
            "opened ITSF container"
        );

        let mut archive = Self {
            unique_id: unique_id.unwrap_or_else(|| generate_unique_id(&path, file_len)),
            path,
            source: RwLock::new(Some(source)),
            itsf,
            directory: Directory::new(itsp, chunks_offset),
            options,
            lzx: Mutex::new(None),
            metadata: Metadata::default(),
            home_path: None,
        };

        let mut metadata = Metadata::load(&archive)?;
        if metadata.lcid.is_none() && archive.itsf.lang_id != 0 {
            metadata.lcid = Some(archive.itsf.lang_id);
        }
        archive.metadata = metadata;
        archive.home_path = match Metadata::resolve_home(&archive, &archive.metadata.home_candidates()) {
            Ok(home) => Some(home),
            Err(Error::NoHomePage) => {
                debug!("archive declares no usable home page");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Arc::new(archive))
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Absolute path of the file the archive was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.title.as_deref()
    }

    /// Resolved home page, `None` when no candidate exists.
    pub fn home_path(&self) -> Option<&str> {
        self.home_path.as_deref()
    }

    pub fn toc_path(&self) -> Option<&str> {
        self.metadata.toc_path.as_deref()
    }

    pub fn index_path(&self) -> Option<&str> {
        self.metadata.index_path.as_deref()
    }

    pub fn itsf_header(&self) -> &ItsfHeader {
        &self.itsf
    }

    pub fn itsp_header(&self) -> &ItspHeader {
        self.directory.header()
    }

    pub fn is_closed(&self) -> bool {
        self.source.read().is_none()
    }

    /// Release the underlying file. Reads already in progress finish on their
    /// own handle; later reads fail with [`Error::Closed`].
    pub fn close(&self) {
        if self.source.write().take().is_some() {
            self.lzx.lock().take();
            debug!(id = %self.unique_id, "closed archive");
        }
    }

    fn byte_source(&self) -> Result<Arc<dyn ByteSource>> {
        self.source.read().clone().ok_or(Error::Closed)
    }

    pub fn has_object(&self, path: &str) -> bool {
        match self.lookup(path) {
            Ok(found) => found.is_some(),
            Err(e) => {
                trace!(path, error = %e, "lookup failed");
                false
            }
        }
    }

    /// The directory entry for `path`.
    pub fn resolve_object(&self, path: &str) -> Result<DirectoryEntry> {
        self.lookup(path)?
            .ok_or_else(|| Error::ObjectNotFound(path.to_string()))
    }

    fn lookup(&self, path: &str) -> Result<Option<DirectoryEntry>> {
        let source = self.byte_source()?;
        self.directory.lookup(&*source, &normalize_path(path))
    }

    pub fn read_object(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.resolve_object(path)?;
        self.read_entry(&entry)
    }

    /// Read an object and decode it as text in the archive's codepage.
    pub fn read_string(&self, path: &str) -> Result<String> {
        let bytes = self.read_object(path)?;
        Ok(decode_text(&bytes, self.metadata.encoding()).into_owned())
    }

    /// Raw bytes of the table of contents, `None` when the archive has none.
    pub fn table_of_contents_data(&self) -> Result<Option<Vec<u8>>> {
        match self.toc_path() {
            Some(path) => self.read_object(path).map(Some),
            None => Ok(None),
        }
    }

    /// Every directory entry in listing order.
    pub fn entries(&self) -> Result<Vec<DirectoryEntry>> {
        let source = self.byte_source()?;
        self.directory.entries(&*source)
    }

    /// Read the data behind a directory entry.
    pub fn read_entry(&self, entry: &DirectoryEntry) -> Result<Vec<u8>> {
        if entry.length > self.options.max_object_len {
            return Err(Error::malformed(format!(
                "{} claims {} bytes, limit is {}",
                entry.path, entry.length, self.options.max_object_len
            )));
        }
        if entry.length == 0 {
            return Ok(Vec::new());
        }
        let source = self.byte_source()?;
        match entry.section {
            SECTION_UNCOMPRESSED => self.read_stored(&*source, entry.offset, entry.length),
            SECTION_MSCOMPRESSED => {
                let section = self.lzx_section(&*source)?;
                section.read(&*source, entry.offset, entry.length)
            }
            n => Err(Error::malformed(format!(
                "{} lives in unknown content section {n}",
                entry.path
            ))),
        }
    }

    fn read_stored(&self, source: &dyn ByteSource, offset: u64, length: u64) -> Result<Vec<u8>> {
        let start = self
            .itsf
            .data_offset
            .checked_add(offset)
            .filter(|&s| s.checked_add(length).is_some_and(|end| end <= source.len()))
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "stored object at {offset}+{length} runs past end of file"
                ))
            })?;
        Ok(source.read_at(start, length as usize)?)
    }

    /// The compressed section, prepared on first use.
    fn lzx_section(&self, source: &dyn ByteSource) -> Result<Arc<LzxSection>> {
        let mut slot = self.lzx.lock();
        if let Some(section) = slot.as_ref() {
            return Ok(Arc::clone(section));
        }

        let stored = |path: &str| -> Result<(DirectoryEntry, Vec<u8>)> {
            let entry = self
                .directory
                .lookup(source, path)?
                .filter(|e| e.section == SECTION_UNCOMPRESSED)
                .ok_or_else(|| Error::malformed(format!("compressed section lacks {path}")))?;
            let data = if path == CONTENT_PATH {
                Vec::new()
            } else {
                self.read_stored(source, entry.offset, entry.length)?
            };
            Ok((entry, data))
        };

        let (_, control) = stored(CONTROL_DATA_PATH)?;
        let (_, table) = stored(RESET_TABLE_PATH)?;
        let (content, _) = stored(CONTENT_PATH)?;

        let section = Arc::new(LzxSection::new(
            ControlData::parse(&control)?,
            ResetTable::parse(&table)?,
            self.itsf.data_offset + content.offset,
            content.length,
            self.options.frame_cache_frames,
        )?);
        *slot = Some(Arc::clone(&section));
        Ok(section)
    }
}

impl ContentSource for Archive {
    fn has_object(&self, path: &str) -> bool {
        Archive::has_object(self, path)
    }

    fn read_object(&self, path: &str) -> Result<Vec<u8>> {
        Archive::read_object(self, path)
    }
}

//! Routing of virtual paths (`chm://<unique id>/<internal path>`) to open
//! archives.
//!
//! The registry never keeps an archive alive: it maps ids to
//! `Weak<Archive>`, and an id whose archive has been dropped resolves like
//! one that was never registered. The lock only guards the map; reads run
//! after it is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use tracing::debug;

use crate::archive::{Archive, normalize_path};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::util::detect_media_format;

pub const DEFAULT_SCHEME: &str = "chm";

/// Characters escaped in the path part of a virtual URL.
const PATH_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A parsed virtual URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPath {
    pub scheme: String,
    pub unique_id: String,
    /// Percent-decoded internal path with a leading `/`.
    pub path: String,
}

impl VirtualPath {
    pub fn new(scheme: &str, unique_id: &str, path: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            unique_id: unique_id.to_string(),
            path: normalize_path(path).into_owned(),
        }
    }

    /// Parse `scheme://id/path`, dropping any query or fragment.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || Error::InvalidVirtualPath(url.to_string());
        let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
        if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphanumeric() || b"+-.".contains(&b)) {
            return Err(invalid());
        }

        let rest = rest.split(['#', '?']).next().unwrap_or_default();
        let (unique_id, path) = match rest.find('/') {
            Some(at) => rest.split_at(at),
            None => (rest, "/"),
        };
        if unique_id.is_empty() {
            return Err(invalid());
        }

        let path = percent_decode_str(path).decode_utf8_lossy();
        Ok(Self::new(&scheme.to_ascii_lowercase(), unique_id, &path))
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}{}",
            self.scheme,
            self.unique_id,
            utf8_percent_encode(&self.path, PATH_ESCAPES)
        )
    }
}

/// Bytes served for a virtual URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Internal path the bytes came from.
    pub path: String,
    pub content_type: &'static str,
    pub data: Vec<u8>,
}

/// Maps archive ids to the archives currently open in the process.
pub struct ArchiveRegistry {
    scheme: String,
    entries: Mutex<HashMap<String, Weak<Archive>>>,
}

impl Default for ArchiveRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEME)
    }
}

impl fmt::Debug for ArchiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveRegistry")
            .field("scheme", &self.scheme)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

impl ArchiveRegistry {
    pub fn new(scheme: &str) -> Self {
        Self {
            scheme: scheme.to_ascii_lowercase(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Add `archive` under its unique id. Registering the same archive twice
    /// is a no-op; another live archive with the same id is an error.
    pub fn register(&self, archive: &Arc<Archive>) -> Result<()> {
        let id = archive.unique_id();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(id).and_then(Weak::upgrade) {
            if Arc::ptr_eq(&existing, archive) {
                return Ok(());
            }
            return Err(Error::DuplicateId(id.to_string()));
        }
        entries.insert(id.to_string(), Arc::downgrade(archive));
        debug!(id, "registered archive");
        Ok(())
    }

    /// Remove `archive`; does nothing when it is not registered.
    pub fn unregister(&self, archive: &Archive) {
        let id = archive.unique_id();
        let mut entries = self.entries.lock();
        let owned = entries
            .get(id)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), archive) || weak.strong_count() == 0);
        if owned {
            entries.remove(id);
            debug!(id, "unregistered archive");
        }
    }

    /// Unregister, then close. Lookups made after this returns miss.
    pub fn release(&self, archive: &Archive) {
        self.unregister(archive);
        archive.close();
    }

    pub fn lookup(&self, unique_id: &str) -> Option<Arc<Archive>> {
        let mut entries = self.entries.lock();
        let weak = entries.get(unique_id)?;
        match weak.upgrade() {
            Some(archive) => Some(archive),
            None => {
                entries.remove(unique_id);
                None
            }
        }
    }

    /// Number of registered archives that are still alive.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `internal_path` from the archive registered as `unique_id`.
    pub fn resolve_virtual_path(
        &self,
        scheme: &str,
        unique_id: &str,
        internal_path: &str,
    ) -> Result<Vec<u8>> {
        let archive = self.archive_for(scheme, unique_id)?;
        archive.read_object(internal_path)
    }

    fn archive_for(&self, scheme: &str, unique_id: &str) -> Result<Arc<Archive>> {
        if !scheme.eq_ignore_ascii_case(&self.scheme) {
            return Err(Error::InvalidVirtualPath(format!(
                "scheme {scheme} is not {}",
                self.scheme
            )));
        }
        // The map lock is released before any archive I/O happens.
        self.lookup(unique_id)
            .ok_or_else(|| Error::UnknownArchive(unique_id.to_string()))
    }

    /// True for well formed URLs in this registry's scheme.
    pub fn can_handle(&self, url: &str) -> bool {
        VirtualPath::parse(url).is_ok_and(|v| v.scheme == self.scheme)
    }

    /// Virtual URL for `path` inside `archive`.
    pub fn url_for(&self, path: &str, archive: &Archive) -> String {
        VirtualPath::new(&self.scheme, archive.unique_id(), path).to_string()
    }

    /// Resolve a virtual URL to bytes and a content type. A URL naming a
    /// directory serves that directory's conventional home page.
    pub fn resolve_url(&self, url: &str) -> Result<Resource> {
        let target = VirtualPath::parse(url)?;
        let archive = self.archive_for(&target.scheme, &target.unique_id)?;

        let path = if target.path.ends_with('/') {
            Metadata::find_home_in(&*archive, &target.path)
                .ok_or_else(|| Error::ObjectNotFound(target.path.clone()))?
        } else {
            target.path
        };
        let data = archive.read_object(&path)?;
        let content_type = detect_media_format(&path, &data).mime_type();
        Ok(Resource {
            path,
            content_type,
            data,
        })
    }
}

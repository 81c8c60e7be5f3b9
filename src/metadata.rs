//! Archive metadata from the `#SYSTEM`, `#WINDOWS` and `#STRINGS` streams.

use encoding_rs::Encoding;
use tracing::{debug, warn};

use crate::archive::{ContentSource, normalize_path};
use crate::chm::headers::get_u32;
use crate::error::{Error, Result};
use crate::util::decode_text;

const SYSTEM_PATH: &str = "/#SYSTEM";
const WINDOWS_PATH: &str = "/#WINDOWS";
const STRINGS_PATH: &str = "/#STRINGS";

const SYSTEM_TOC: u16 = 0;
const SYSTEM_INDEX: u16 = 1;
const SYSTEM_DEFAULT_TOPIC: u16 = 2;
const SYSTEM_TITLE: u16 = 3;
const SYSTEM_LCID: u16 = 4;
const SYSTEM_COMPILED_FILE: u16 = 6;

const WINDOW_TITLE: usize = 0x14;
const WINDOW_TOC: usize = 0x60;
const WINDOW_INDEX: usize = 0x64;
const WINDOW_HOME: usize = 0x68;

/// Conventional home page names tried when no declared candidate exists.
pub const HOME_FALLBACKS: [&str; 4] = ["index.htm", "index.html", "default.html", "default.htm"];

/// What an archive says about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: Option<String>,
    /// Default topic from `#SYSTEM`.
    pub default_topic: Option<String>,
    /// Home page of the first window definition.
    pub window_home: Option<String>,
    pub toc_path: Option<String>,
    pub index_path: Option<String>,
    pub lcid: Option<u32>,
    /// Stem of the project file the archive was compiled from.
    pub compiled_file: Option<String>,
}

impl Metadata {
    /// Read `#SYSTEM`, then fill whatever is still missing from the
    /// `#WINDOWS` entries in order. Missing or damaged streams leave fields
    /// empty.
    pub fn load<S: ContentSource + ?Sized>(source: &S) -> Result<Self> {
        let mut meta = Metadata::default();

        if let Some(system) = read_optional(source, SYSTEM_PATH)? {
            meta.apply_system(&system);
        }

        if let (Some(windows), Some(strings)) = (
            read_optional(source, WINDOWS_PATH)?,
            read_optional(source, STRINGS_PATH)?,
        ) {
            meta.apply_windows(&windows, &strings);
        }

        if let Some(stem) = meta.compiled_file.clone() {
            if meta.toc_path.is_none() {
                meta.toc_path = existing_path(source, &format!("/{stem}.hhc"));
            }
            if meta.index_path.is_none() {
                meta.index_path = existing_path(source, &format!("/{stem}.hhk"));
            }
        }

        debug!(
            title = meta.title.as_deref().unwrap_or(""),
            toc = meta.toc_path.as_deref().unwrap_or(""),
            index = meta.index_path.as_deref().unwrap_or(""),
            lcid = meta.lcid.unwrap_or(0),
            "loaded archive metadata"
        );
        Ok(meta)
    }

    /// Codepage implied by the language id.
    pub fn encoding(&self) -> Option<&'static Encoding> {
        self.lcid.map(encoding_for_lcid)
    }

    /// Declared home pages in priority order.
    pub fn home_candidates(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for home in [&self.default_topic, &self.window_home].into_iter().flatten() {
            if !out.contains(home) {
                out.push(home.clone());
            }
        }
        out
    }

    /// First candidate the archive contains, as written, falling back to the
    /// conventional names at the archive root.
    pub fn resolve_home<S: ContentSource + ?Sized>(source: &S, candidates: &[String]) -> Result<String> {
        if let Some(found) = candidates.iter().find(|c| source.has_object(c)) {
            return Ok(found.clone());
        }
        if !candidates.is_empty() {
            debug!(?candidates, "no declared home page exists, trying defaults");
        }
        Self::find_home_in(source, "/").ok_or(Error::NoHomePage)
    }

    /// Look for a conventional home page inside `base_dir`.
    pub fn find_home_in<S: ContentSource + ?Sized>(source: &S, base_dir: &str) -> Option<String> {
        let base = normalize_path(base_dir.trim_end_matches('/'));
        let base = base.trim_end_matches('/');
        HOME_FALLBACKS
            .iter()
            .map(|name| format!("{base}/{name}"))
            .find(|path| source.has_object(path))
    }

    fn apply_system(&mut self, data: &[u8]) {
        // Strings are decoded once the LCID record has been seen.
        let mut raw: Vec<(u16, &[u8])> = Vec::new();
        let mut pos = 4;
        while pos + 4 <= data.len() {
            let code = u16::from_le_bytes([data[pos], data[pos + 1]]);
            let len = usize::from(u16::from_le_bytes([data[pos + 2], data[pos + 3]]));
            let Some(record) = data.get(pos + 4..pos + 4 + len) else {
                warn!(code, len, "truncated #SYSTEM record");
                break;
            };
            if code == SYSTEM_LCID {
                self.lcid = get_u32(record, 0);
            } else {
                raw.push((code, record));
            }
            pos += 4 + len;
        }

        let encoding = self.encoding();
        for (code, record) in raw {
            let value = c_string(record, encoding);
            match code {
                SYSTEM_TOC => self.toc_path = value.map(as_path),
                SYSTEM_INDEX => self.index_path = value.map(as_path),
                SYSTEM_DEFAULT_TOPIC => self.default_topic = value.map(as_path),
                SYSTEM_TITLE => self.title = value,
                SYSTEM_COMPILED_FILE => self.compiled_file = value,
                _ => {}
            }
        }
    }

    fn apply_windows(&mut self, windows: &[u8], strings: &[u8]) {
        let (Some(count), Some(entry_size)) = (get_u32(windows, 0), get_u32(windows, 4)) else {
            warn!("truncated #WINDOWS header");
            return;
        };
        let entry_size = entry_size as usize;
        if entry_size < WINDOW_HOME + 4 {
            return;
        }

        let encoding = self.encoding();
        for i in 0..count as usize {
            if self.title.is_some()
                && self.toc_path.is_some()
                && self.index_path.is_some()
                && self.window_home.is_some()
            {
                break;
            }
            let start = 8 + i * entry_size;
            let Some(entry) = windows.get(start..start + entry_size) else {
                warn!(entry = i, entry_size, "truncated #WINDOWS entry");
                return;
            };
            let string_at = |field: usize| {
                get_u32(entry, field)
                    .filter(|&offset| offset != 0)
                    .and_then(|offset| strings.get(offset as usize..))
                    .and_then(|s| c_string(s, encoding))
            };

            if self.title.is_none() {
                self.title = string_at(WINDOW_TITLE);
            }
            if self.toc_path.is_none() {
                self.toc_path = string_at(WINDOW_TOC).map(as_path);
            }
            if self.index_path.is_none() {
                self.index_path = string_at(WINDOW_INDEX).map(as_path);
            }
            if self.window_home.is_none() {
                self.window_home = string_at(WINDOW_HOME).map(as_path);
            }
        }
    }
}

/// Read a metadata stream, treating a missing or damaged one as absent.
fn read_optional<S: ContentSource + ?Sized>(source: &S, path: &str) -> Result<Option<Vec<u8>>> {
    match source.read_object(path) {
        Ok(data) => Ok(Some(data)),
        Err(Error::ObjectNotFound(_)) => Ok(None),
        Err(e @ (Error::Decompression(_) | Error::MalformedArchive(_))) => {
            warn!(path, error = %e, "ignoring unreadable metadata stream");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn existing_path<S: ContentSource + ?Sized>(source: &S, path: &str) -> Option<String> {
    source.has_object(path).then(|| path.to_string())
}

/// Text up to the first NUL, `None` when empty.
fn c_string(data: &[u8], encoding: Option<&'static Encoding>) -> Option<String> {
    let end = memchr::memchr(0, data).unwrap_or(data.len());
    let text = decode_text(&data[..end], encoding);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn as_path(value: String) -> String {
    normalize_path(&value).into_owned()
}

/// Windows codepage for a language id.
pub fn encoding_for_lcid(lcid: u32) -> &'static Encoding {
    match lcid & 0x3FF {
        0x04 => match lcid {
            0x0404 | 0x0C04 | 0x1404 => encoding_rs::BIG5,
            _ => encoding_rs::GBK,
        },
        0x11 => encoding_rs::SHIFT_JIS,
        0x12 => encoding_rs::EUC_KR,
        0x02 | 0x19 | 0x22 | 0x23 | 0x2F | 0x3F | 0x40 | 0x44 | 0x50 => encoding_rs::WINDOWS_1251,
        0x05 | 0x0E | 0x15 | 0x18 | 0x1A | 0x1B | 0x1C | 0x24 => encoding_rs::WINDOWS_1250,
        0x08 => encoding_rs::WINDOWS_1253,
        0x1F | 0x2C | 0x43 => encoding_rs::WINDOWS_1254,
        0x0D => encoding_rs::WINDOWS_1255,
        0x01 | 0x20 | 0x29 => encoding_rs::WINDOWS_1256,
        0x25 | 0x26 | 0x27 => encoding_rs::WINDOWS_1257,
        0x2A => encoding_rs::WINDOWS_1258,
        0x1E => encoding_rs::WINDOWS_874,
        _ => encoding_rs::WINDOWS_1252,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{WindowStrings, cstr, system_stream, windows_streams};
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeSource(HashMap<String, Vec<u8>>);

    impl FakeSource {
        fn with(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
            self.0.insert(path.to_string(), data.into());
            self
        }
    }

    impl ContentSource for FakeSource {
        fn has_object(&self, path: &str) -> bool {
            self.0.contains_key(normalize_path(path).as_ref())
        }

        fn read_object(&self, path: &str) -> Result<Vec<u8>> {
            self.0
                .get(normalize_path(path).as_ref())
                .cloned()
                .ok_or_else(|| Error::ObjectNotFound(path.to_string()))
        }
    }

    #[test]
    fn test_system_records() {
        let system = system_stream(&[
            (SYSTEM_TOC, cstr("toc.hhc")),
            (SYSTEM_INDEX, cstr("index.hhk")),
            (SYSTEM_DEFAULT_TOPIC, cstr("start.html")),
            (SYSTEM_TITLE, cstr("Sample Help")),
            (SYSTEM_LCID, 0x409u32.to_le_bytes().to_vec()),
            (16, cstr("Arial,8,0")),
        ]);
        let meta = Metadata::load(&FakeSource::default().with(SYSTEM_PATH, system)).unwrap();

        assert_eq!(meta.title.as_deref(), Some("Sample Help"));
        assert_eq!(meta.toc_path.as_deref(), Some("/toc.hhc"));
        assert_eq!(meta.index_path.as_deref(), Some("/index.hhk"));
        assert_eq!(meta.default_topic.as_deref(), Some("/start.html"));
        assert_eq!(meta.lcid, Some(0x409));
        assert_eq!(meta.encoding(), Some(encoding_rs::WINDOWS_1252));
    }

    #[test]
    fn test_windows_fill_missing_fields() {
        let system = system_stream(&[(SYSTEM_TITLE, cstr(""))]);
        let (windows, strings) = windows_streams(&[WindowStrings {
            title: "Window Title".into(),
            toc: "contents.hhc".into(),
            index: String::new(),
            home: "welcome.htm".into(),
        }]);
        let source = FakeSource::default()
            .with(SYSTEM_PATH, system)
            .with(WINDOWS_PATH, windows)
            .with(STRINGS_PATH, strings);
        let meta = Metadata::load(&source).unwrap();

        assert_eq!(meta.title.as_deref(), Some("Window Title"));
        assert_eq!(meta.toc_path.as_deref(), Some("/contents.hhc"));
        assert_eq!(meta.index_path, None);
        assert_eq!(meta.home_candidates(), vec!["/welcome.htm".to_string()]);
    }

    #[test]
    fn test_later_windows_fill_what_earlier_ones_lack() {
        let (windows, strings) = windows_streams(&[
            WindowStrings {
                title: "Main".into(),
                ..Default::default()
            },
            WindowStrings {
                title: "Secondary".into(),
                toc: "second.hhc".into(),
                ..Default::default()
            },
            WindowStrings {
                toc: "third.hhc".into(),
                index: "third.hhk".into(),
                home: "third.htm".into(),
                ..Default::default()
            },
        ]);
        let source = FakeSource::default()
            .with(WINDOWS_PATH, windows)
            .with(STRINGS_PATH, strings);
        let meta = Metadata::load(&source).unwrap();

        assert_eq!(meta.title.as_deref(), Some("Main"));
        assert_eq!(meta.toc_path.as_deref(), Some("/second.hhc"));
        assert_eq!(meta.index_path.as_deref(), Some("/third.hhk"));
        assert_eq!(meta.home_candidates(), vec!["/third.htm".to_string()]);
    }

    #[test]
    fn test_truncated_windows_keeps_complete_entries() {
        let (mut windows, strings) = windows_streams(&[
            WindowStrings {
                title: "First".into(),
                ..Default::default()
            },
            WindowStrings {
                toc: "lost.hhc".into(),
                ..Default::default()
            },
        ]);
        windows.truncate(windows.len() - 10);
        let source = FakeSource::default()
            .with(WINDOWS_PATH, windows)
            .with(STRINGS_PATH, strings);
        let meta = Metadata::load(&source).unwrap();

        assert_eq!(meta.title.as_deref(), Some("First"));
        assert_eq!(meta.toc_path, None);
    }

    #[test]
    fn test_compiled_file_stem_finds_sitemaps() {
        let system = system_stream(&[(SYSTEM_COMPILED_FILE, cstr("manual"))]);
        let source = FakeSource::default()
            .with(SYSTEM_PATH, system)
            .with("/manual.hhc", b"<ul></ul>".to_vec());
        let meta = Metadata::load(&source).unwrap();
        assert_eq!(meta.toc_path.as_deref(), Some("/manual.hhc"));
        assert_eq!(meta.index_path, None);
    }

    #[test]
    fn test_missing_streams_give_empty_metadata() {
        let meta = Metadata::load(&FakeSource::default()).unwrap();
        assert_eq!(meta, Metadata::default());
        assert!(meta.home_candidates().is_empty());
    }

    #[test]
    fn test_truncated_system_keeps_earlier_records() {
        let mut system = system_stream(&[(SYSTEM_TITLE, cstr("Kept"))]);
        system.extend_from_slice(&[0, 0, 50, 0, b'x']);
        let meta = Metadata::load(&FakeSource::default().with(SYSTEM_PATH, system)).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Kept"));
        assert_eq!(meta.toc_path, None);
    }

    #[test]
    fn test_resolve_home_priority() {
        let source = FakeSource::default().with("/default.htm", b"home".to_vec());
        let candidates = vec!["index.html".to_string(), "default.htm".to_string()];
        assert_eq!(Metadata::resolve_home(&source, &candidates).unwrap(), "default.htm");
    }

    #[test]
    fn test_resolve_home_fallbacks() {
        let source = FakeSource::default().with("/index.html", b"home".to_vec());
        let candidates = vec!["/stale.html".to_string()];
        assert_eq!(Metadata::resolve_home(&source, &candidates).unwrap(), "/index.html");

        let empty = FakeSource::default();
        assert!(matches!(
            Metadata::resolve_home(&empty, &candidates),
            Err(Error::NoHomePage)
        ));
    }

    #[test]
    fn test_find_home_in_directory() {
        let source = FakeSource::default().with("/docs/default.html", b"x".to_vec());
        assert_eq!(
            Metadata::find_home_in(&source, "docs/").as_deref(),
            Some("/docs/default.html")
        );
        assert_eq!(Metadata::find_home_in(&source, "/other"), None);
    }

    #[test]
    fn test_lcid_codepages() {
        assert_eq!(encoding_for_lcid(0x0804), encoding_rs::GBK);
        assert_eq!(encoding_for_lcid(0x0404), encoding_rs::BIG5);
        assert_eq!(encoding_for_lcid(0x0411), encoding_rs::SHIFT_JIS);
        assert_eq!(encoding_for_lcid(0x0419), encoding_rs::WINDOWS_1251);
        assert_eq!(encoding_for_lcid(0x0407), encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn test_title_in_archive_codepage() {
        // "Справка" in windows-1251.
        let title = [0xD1, 0xEF, 0xF0, 0xE0, 0xE2, 0xEA, 0xE0, 0x00];
        let system = system_stream(&[(SYSTEM_TITLE, title.to_vec()), (SYSTEM_LCID, 0x419u32.to_le_bytes().to_vec())]);
        let meta = Metadata::load(&FakeSource::default().with(SYSTEM_PATH, system)).unwrap();
        assert_eq!(meta.title.as_deref(), Some("Справка"));
    }
}

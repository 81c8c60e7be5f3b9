//! Archive reading tests.
//!
//! Archives are assembled with the crate's test builder, written to a
//! temporary file and opened the same way a real `.chm` would be.

use std::io::Write;
use std::sync::Arc;

use chmkit::chm::section::CONTENT_PATH;
use chmkit::chm::{SECTION_MSCOMPRESSED, SECTION_UNCOMPRESSED};
use chmkit::test_helpers::{ChmBuilder, LzxStyle};
use chmkit::{Archive, Error, ReaderOptions};
use tempfile::NamedTempFile;

fn write_archive(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn open(builder: ChmBuilder) -> (NamedTempFile, Arc<Archive>) {
    let file = write_archive(&builder.build());
    let archive = Archive::open(file.path()).unwrap();
    (file, archive)
}

/// Text that compresses but is not a single repeated byte.
fn page_text(seed: usize, len: usize) -> Vec<u8> {
    let words = ["alpha ", "beta ", "gamma ", "delta ", "<p>", "</p>\n", "epsilon "];
    let mut out = Vec::with_capacity(len);
    let mut i = seed;
    while out.len() < len {
        out.extend_from_slice(words[i % words.len()].as_bytes());
        out.extend_from_slice(format!("{} ", i * 7 % 1000).as_bytes());
        i += 1;
    }
    out.truncate(len);
    out
}

// ============================================================================
// Opening
// ============================================================================

#[test]
fn test_open_from_file() {
    let (file, archive) = open(ChmBuilder::new().stored("/index.html", b"<html>home</html>"));

    assert_eq!(archive.itsf_header().version, 3);
    assert!(archive.path().is_absolute());
    assert_eq!(archive.path().file_name(), file.path().file_name());
    assert!(!archive.unique_id().is_empty());
    assert!(!archive.is_closed());
}

#[test]
fn test_open_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Archive::open(dir.path().join("absent.chm"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_open_rejects_non_chm_files() {
    let file = write_archive(&[0x42; 4096]);
    assert!(matches!(
        Archive::open(file.path()),
        Err(Error::MalformedArchive(_))
    ));

    let short = write_archive(b"ITSF");
    assert!(matches!(
        Archive::open(short.path()),
        Err(Error::MalformedArchive(_))
    ));
}

#[test]
fn test_truncated_archive_is_malformed() {
    let bytes = ChmBuilder::new()
        .compressed("/index.html", page_text(0, 2000))
        .build();
    let file = write_archive(&bytes[..bytes.len() / 2]);
    assert!(matches!(
        Archive::open(file.path()),
        Err(Error::MalformedArchive(_))
    ));
}

#[test]
fn test_version_2_header() {
    let (_file, archive) = open(
        ChmBuilder::new()
            .itsf_version(2)
            .stored("/a.html", b"stored")
            .compressed("/b.html", b"compressed"),
    );
    assert_eq!(archive.itsf_header().version, 2);
    assert_eq!(archive.read_object("/a.html").unwrap(), b"stored");
    assert_eq!(archive.read_object("/b.html").unwrap(), b"compressed");
}

#[test]
fn test_unique_ids_differ_per_open() {
    let file = write_archive(&ChmBuilder::new().stored("/x.html", b"x").build());
    let first = Archive::open(file.path()).unwrap();
    let second = Archive::open(file.path()).unwrap();
    assert_ne!(first.unique_id(), second.unique_id());
}

// ============================================================================
// Reading objects
// ============================================================================

#[test]
fn test_stored_and_compressed_objects() {
    let page = page_text(3, 5000);
    let (_file, archive) = open(
        ChmBuilder::new()
            .stored("/style.css", b"body { margin: 0 }")
            .compressed("/index.html", &page)
            .compressed("/empty.html", b""),
    );

    assert_eq!(archive.read_object("/style.css").unwrap(), b"body { margin: 0 }");
    assert_eq!(archive.read_object("/index.html").unwrap(), page);
    assert_eq!(archive.read_object("/empty.html").unwrap(), b"");

    let css = archive.resolve_object("/style.css").unwrap();
    assert_eq!(css.section, SECTION_UNCOMPRESSED);
    let html = archive.resolve_object("/index.html").unwrap();
    assert_eq!(html.section, SECTION_MSCOMPRESSED);
    assert_eq!(html.length, page.len() as u64);
}

#[test]
fn test_paths_are_case_insensitive_and_rooted() {
    let (_file, archive) = open(ChmBuilder::new().compressed("/Docs/Intro.html", b"intro"));

    assert!(archive.has_object("/Docs/Intro.html"));
    assert!(archive.has_object("/docs/intro.HTML"));
    assert!(archive.has_object("Docs/Intro.html"));
    assert_eq!(archive.read_object("docs/intro.html").unwrap(), b"intro");
}

#[test]
fn test_missing_object() {
    let (_file, archive) = open(ChmBuilder::new().stored("/a.html", b"a"));

    assert!(!archive.has_object("/b.html"));
    assert!(matches!(
        archive.read_object("/b.html"),
        Err(Error::ObjectNotFound(path)) if path == "/b.html"
    ));
}

#[test]
fn test_repeated_reads_are_identical() {
    let page = page_text(11, 40_000);
    let (_file, archive) = open(ChmBuilder::new().compressed("/big.html", &page));

    let first = archive.read_object("/big.html").unwrap();
    let second = archive.read_object("/big.html").unwrap();
    assert_eq!(first, page);
    assert_eq!(second, page);
}

#[test]
fn test_objects_spanning_many_frames() {
    // Three reset groups of two frames plus a partial frame.
    let before = page_text(1, 20_000);
    let big = page_text(2, 6 * 0x8000 + 777);
    let after = page_text(4, 3000);

    for style in [LzxStyle::Verbatim, LzxStyle::Aligned, LzxStyle::Stored, LzxStyle::Mixed] {
        let (_file, archive) = open(
            ChmBuilder::new()
                .lzx_style(style)
                .compressed("/a.html", &before)
                .compressed("/b.html", &big)
                .compressed("/c.html", &after),
        );
        assert_eq!(archive.read_object("/c.html").unwrap(), after, "{style:?}");
        assert_eq!(archive.read_object("/b.html").unwrap(), big, "{style:?}");
        assert_eq!(archive.read_object("/a.html").unwrap(), before, "{style:?}");
    }
}

#[test]
fn test_other_reset_intervals() {
    let data = page_text(5, 5 * 0x8000);
    for reset_frames in [1, 4] {
        let (_file, archive) = open(
            ChmBuilder::new()
                .reset_frames(reset_frames)
                .compressed("/pad.html", page_text(6, 100))
                .compressed("/data.html", &data),
        );
        assert_eq!(archive.read_object("/data.html").unwrap(), data, "{reset_frames}");
    }
}

#[test]
fn test_frame_cache_disabled() {
    let data = page_text(8, 3 * 0x8000);
    let file = write_archive(&ChmBuilder::new().compressed("/data.html", &data).build());
    let archive =
        Archive::open_with(file.path(), ReaderOptions::new().with_frame_cache_frames(0)).unwrap();

    assert_eq!(archive.read_object("/data.html").unwrap(), data);
    assert_eq!(archive.read_object("/data.html").unwrap(), data);
}

#[test]
fn test_object_size_limit() {
    let file = write_archive(
        &ChmBuilder::new()
            .stored("/small.html", b"ok")
            .stored("/large.html", vec![b'x'; 4096])
            .build(),
    );
    let archive =
        Archive::open_with(file.path(), ReaderOptions::new().with_max_object_len(1024)).unwrap();

    assert_eq!(archive.read_object("/small.html").unwrap(), b"ok");
    assert!(matches!(
        archive.read_object("/large.html"),
        Err(Error::MalformedArchive(_))
    ));
}

#[test]
fn test_corrupt_frame_only_breaks_its_reset_group() {
    let head = page_text(1, 1000);
    let filler = page_text(2, 70_000);
    let tail = page_text(3, 5000);
    let mut bytes = ChmBuilder::new()
        .compressed("/a.html", &head)
        .compressed("/m.html", &filler)
        .compressed("/z.html", &tail)
        .build();

    // Locate the compressed stream and clobber the start of the first frame.
    let content = {
        let file = write_archive(&bytes);
        let archive = Archive::open(file.path()).unwrap();
        let entry = archive.resolve_object(CONTENT_PATH).unwrap();
        archive.itsf_header().data_offset + entry.offset
    } as usize;
    for b in &mut bytes[content + 2..content + 40] {
        *b = 0xFF;
    }

    let file = write_archive(&bytes);
    let archive = Archive::open(file.path()).unwrap();
    assert!(matches!(
        archive.read_object("/a.html"),
        Err(Error::Decompression(_))
    ));
    assert!(archive.read_object("/m.html").is_err());
    // "/z.html" starts past 0x10000, in the second reset group.
    assert_eq!(archive.read_object("/z.html").unwrap(), tail);
}

// ============================================================================
// Directory
// ============================================================================

#[test]
fn test_multi_chunk_directory() {
    let mut builder = ChmBuilder::new().chunk_size(0x200).quickref_density(1);
    for i in 0..80 {
        let path = format!("/pages/page{i:03}.html");
        builder = if i % 2 == 0 {
            builder.stored(&path, format!("stored page {i}"))
        } else {
            builder.compressed(&path, format!("compressed page {i}"))
        };
    }
    let (_file, archive) = open(builder);

    assert!(archive.itsp_header().num_chunks > 2);
    assert!(archive.itsp_header().index_root.is_some());

    for i in 0..80 {
        let path = format!("/pages/page{i:03}.html");
        let expected = if i % 2 == 0 {
            format!("stored page {i}")
        } else {
            format!("compressed page {i}")
        };
        assert_eq!(archive.read_string(&path).unwrap(), expected);
    }
    assert!(!archive.has_object("/pages/page080.html"));
    assert!(!archive.has_object("/pages/page.html"));
    assert!(!archive.has_object("/zzz.html"));
}

#[test]
fn test_entries_listing_order() {
    let (_file, archive) = open(
        ChmBuilder::new()
            .compressed("/b.html", b"b")
            .stored("/A.css", b"a")
            .compressed("/c/d.html", b"d"),
    );

    let entries = archive.entries().unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
    for name in ["/A.css", "/b.html", "/c/d.html", CONTENT_PATH] {
        assert!(names.contains(&name), "{name}");
    }
    let user: Vec<_> = names.iter().filter(|n| n.starts_with('/')).copied().collect();
    assert_eq!(user, vec!["/A.css", "/b.html", "/c/d.html"]);

    let d = entries.iter().find(|e| e.path == "/c/d.html").unwrap();
    assert_eq!(archive.read_entry(d).unwrap(), b"d");
}

// ============================================================================
// Closing
// ============================================================================

#[test]
fn test_close_is_idempotent() {
    let (_file, archive) = open(ChmBuilder::new().compressed("/a.html", b"a"));
    assert_eq!(archive.read_object("/a.html").unwrap(), b"a");

    archive.close();
    archive.close();
    assert!(archive.is_closed());
    assert!(matches!(archive.read_object("/a.html"), Err(Error::Closed)));
    assert!(!archive.has_object("/a.html"));
    assert!(matches!(archive.entries(), Err(Error::Closed)));
    // Metadata read at open time stays available.
    assert!(archive.unique_id().len() > 8);
}

//! One archive shared by many threads, and a registry used while archives
//! come and go.

use std::io::Write;
use std::sync::Arc;
use std::thread;

use chmkit::test_helpers::{ChmBuilder, LzxStyle};
use chmkit::{Archive, ArchiveRegistry, ReaderOptions};
use tempfile::NamedTempFile;

fn page(i: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut n = 0;
    while out.len() < 9000 + i * 1500 {
        out.extend_from_slice(format!("<p>page {i} line {n}</p>\n").as_bytes());
        n += 1;
    }
    out
}

fn write_pages(count: usize, style: LzxStyle) -> NamedTempFile {
    let mut builder = ChmBuilder::new().lzx_style(style);
    for i in 0..count {
        builder = builder.compressed(&format!("/pages/{i:02}.html"), page(i));
    }
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&builder.build()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_parallel_reads_of_one_archive() {
    let file = write_pages(16, LzxStyle::Mixed);
    for frames in [0, 2, 8] {
        let options = ReaderOptions::new().with_frame_cache_frames(frames);
        let archive = Archive::open_with(file.path(), options).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let archive = Arc::clone(&archive);
                thread::spawn(move || {
                    for round in 0..3 {
                        for k in 0..16 {
                            let i = (k * 5 + t + round) % 16;
                            let data = archive.read_object(&format!("/pages/{i:02}.html")).unwrap();
                            assert_eq!(data, page(i), "thread {t} page {i}");
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

#[test]
fn test_close_while_reading() {
    let file = write_pages(8, LzxStyle::Verbatim);
    let archive = Archive::open(file.path()).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|t| {
            let archive = Arc::clone(&archive);
            thread::spawn(move || {
                for k in 0..40 {
                    let i = (k + t) % 8;
                    match archive.read_object(&format!("/pages/{i:02}.html")) {
                        Ok(data) => assert_eq!(data, page(i)),
                        Err(chmkit::Error::Closed) => return,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    archive.close();
    for reader in readers {
        reader.join().unwrap();
    }
    assert!(archive.is_closed());
}

#[test]
fn test_registry_lookups_while_archives_change() {
    let file = write_pages(4, LzxStyle::Verbatim);
    let registry = Arc::new(ArchiveRegistry::default());
    let stable = Archive::open(file.path()).unwrap();
    registry.register(&stable).unwrap();
    let stable_url = registry.url_for("/pages/03.html", &stable);

    let churn = {
        let registry = Arc::clone(&registry);
        let path = file.path().to_path_buf();
        thread::spawn(move || {
            for _ in 0..20 {
                let archive = Archive::open(&path).unwrap();
                registry.register(&archive).unwrap();
                let url = registry.url_for("/pages/00.html", &archive);
                assert_eq!(registry.resolve_url(&url).unwrap().data, page(0));
                registry.release(&archive);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let url = stable_url.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    let resource = registry.resolve_url(&url).unwrap();
                    assert_eq!(resource.data, page(3));
                }
            })
        })
        .collect();

    churn.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(registry.len(), 1);
}

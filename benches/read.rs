//! Benchmarks for archive reads.
//!
//! Run with: cargo bench

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use chmkit::io::MemorySource;
use chmkit::test_helpers::{ChmBuilder, sitemap};
use chmkit::{Archive, ReaderOptions, TableOfContents};

const PAGES: usize = 64;

fn sample_page(i: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut n = 0;
    while out.len() < 12_000 {
        out.extend_from_slice(format!("<p class=\"body\">Section {i}, paragraph {n}.</p>\n").as_bytes());
        n += 1;
    }
    out
}

fn sample_archive() -> Vec<u8> {
    let mut builder = ChmBuilder::new().reset_frames(2);
    let names: Vec<String> = (0..PAGES).map(|i| format!("Page {i}")).collect();
    let locals: Vec<String> = (0..PAGES).map(|i| format!("page{i:03}.html")).collect();
    for (i, local) in locals.iter().enumerate() {
        builder = builder.compressed(&format!("/{local}"), sample_page(i));
    }
    let items: Vec<_> = (0..PAGES)
        .map(|i| (i % 2, names[i].as_str(), locals[i].as_str()))
        .collect();
    builder.compressed("/toc.hhc", sitemap(&items)).build()
}

fn open(bytes: &[u8], options: ReaderOptions) -> Arc<Archive> {
    let source = Arc::new(MemorySource::new(bytes.to_vec()));
    Archive::from_source(source, "bench.chm", options).unwrap()
}

// ============================================================================
// Archive Benchmarks
// ============================================================================

fn bench_open(c: &mut Criterion) {
    let bytes = sample_archive();

    c.bench_function("open_archive", |b| {
        b.iter(|| open(&bytes, ReaderOptions::default()));
    });
}

fn bench_lookup(c: &mut Criterion) {
    let archive = open(&sample_archive(), ReaderOptions::default());

    c.bench_function("lookup_object", |b| {
        b.iter(|| archive.resolve_object("/page040.html").unwrap());
    });
}

fn bench_read_uncached(c: &mut Criterion) {
    let archive = open(&sample_archive(), ReaderOptions::new().with_frame_cache_frames(0));

    c.bench_function("read_object_uncached", |b| {
        b.iter(|| archive.read_object("/page033.html").unwrap());
    });
}

fn bench_read_cached(c: &mut Criterion) {
    let archive = open(&sample_archive(), ReaderOptions::default());

    c.bench_function("read_object_cached", |b| {
        b.iter(|| archive.read_object("/page033.html").unwrap());
    });
}

fn bench_read_all(c: &mut Criterion) {
    let archive = open(&sample_archive(), ReaderOptions::default());
    let paths: Vec<String> = (0..PAGES).map(|i| format!("/page{i:03}.html")).collect();

    c.bench_function("read_all_pages", |b| {
        b.iter(|| {
            for path in &paths {
                archive.read_object(path).unwrap();
            }
        });
    });
}

// ============================================================================
// Navigation Benchmarks
// ============================================================================

fn bench_build_toc(c: &mut Criterion) {
    let bytes = sample_archive();
    let archive = open(&bytes, ReaderOptions::default());
    let data = archive.read_object("/toc.hhc").unwrap();

    c.bench_function("decode_sitemap", |b| {
        b.iter(|| TableOfContents::decode_with(&data, &chmkit::SitemapDecoder::new()).unwrap());
    });
}

criterion_group!(
    benches,
    // Archive
    bench_open,
    bench_lookup,
    bench_read_uncached,
    bench_read_cached,
    bench_read_all,
    // Navigation
    bench_build_toc,
);
criterion_main!(benches);

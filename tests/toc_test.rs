//! Table of contents and keyword index trees built from archives.

use std::io::Write;
use std::sync::Arc;

use chmkit::test_helpers::{ChmBuilder, cstr, sitemap, system_stream};
use chmkit::{Archive, Error, SitemapDecoder, TableOfContents, Topic};
use tempfile::NamedTempFile;

fn open(builder: ChmBuilder) -> (NamedTempFile, Arc<Archive>) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&builder.build()).unwrap();
    file.flush().unwrap();
    let archive = Archive::open(file.path()).unwrap();
    (file, archive)
}

fn with_sitemaps(toc: &str, index: &str) -> ChmBuilder {
    ChmBuilder::new()
        .stored(
            "/#SYSTEM",
            system_stream(&[(0, cstr("toc.hhc")), (1, cstr("index.hhk"))]),
        )
        .compressed("/toc.hhc", toc)
        .compressed("/index.hhk", index)
}

#[test]
fn test_build_contents_tree() {
    let toc = sitemap(&[
        (0, "A", ""),
        (1, "A.1", "pageA1.html"),
        (1, "A.2", ""),
        (0, "B", "b.html"),
    ]);
    let (_file, archive) = open(with_sitemaps(&toc, "<ul></ul>"));

    let tree = TableOfContents::build(&archive).unwrap();
    assert_eq!(tree.root_topics().len(), 2);

    let a = &tree.root_topics()[0];
    assert_eq!(a.name, "A");
    assert_eq!(a.child_count(), 2);
    assert_eq!(a.child_at(0).unwrap(), &Topic::new("A.1", "pageA1.html"));
    assert_eq!(a.child_at(1).unwrap(), &Topic::new("A.2", ""));
    assert!(a.child_at(2).is_err());

    let walk: Vec<_> = tree
        .iter()
        .map(|(depth, t)| format!("{depth}:{}", t.name))
        .collect();
    assert_eq!(walk, vec!["0:A", "1:A.1", "1:A.2", "0:B"]);
    assert_eq!(tree.len(), 4);
}

#[test]
fn test_build_keyword_index() {
    let index = sitemap(&[
        (0, "install", "setup.html"),
        (0, "options", ""),
        (1, "colors", "colors.html"),
    ]);
    let (_file, archive) = open(with_sitemaps("<ul></ul>", &index));

    let tree = TableOfContents::build_index(&archive).unwrap();
    assert_eq!(tree.root_topics()[0].location, "setup.html");
    assert_eq!(tree.root_topics()[1].children()[0].name, "colors");

    assert!(TableOfContents::build(&archive).unwrap().is_empty());
}

#[test]
fn test_no_contents_declared() {
    let (_file, archive) = open(ChmBuilder::new().compressed("/index.html", b"x"));
    let tree = TableOfContents::build(&archive).unwrap();
    assert!(tree.is_empty());
    assert_eq!(tree.iter().count(), 0);
    assert!(TableOfContents::build_index(&archive).unwrap().is_empty());
}

#[test]
fn test_declared_contents_missing_from_archive() {
    let (_file, archive) = open(ChmBuilder::new().stored(
        "/#SYSTEM",
        system_stream(&[(0, cstr("gone.hhc"))]),
    ));
    assert!(matches!(
        TableOfContents::build(&archive),
        Err(Error::ObjectNotFound(_))
    ));
}

#[test]
fn test_large_contents_tree() {
    let names: Vec<String> = (0..300).map(|i| format!("Topic {i}")).collect();
    let locals: Vec<String> = (0..300).map(|i| format!("t{i}.html")).collect();
    let items: Vec<(usize, &str, &str)> = (0..300)
        .map(|i| (i % 3, names[i].as_str(), locals[i].as_str()))
        .collect();
    let toc = sitemap(&items);
    assert!(toc.len() > 0x8000);

    let (_file, archive) = open(with_sitemaps(&toc, "<ul></ul>"));
    let tree = TableOfContents::build(&archive).unwrap();

    assert_eq!(tree.len(), 300);
    assert_eq!(tree.root_topics().len(), 100);
    let first = &tree.root_topics()[0];
    assert_eq!(first.children()[0].name, "Topic 1");
    assert_eq!(first.children()[0].children()[0].location, "t2.html");
}

#[test]
fn test_decode_with_codepage() {
    // "Ελληνικά" in windows-1253.
    let greek = [0xC5, 0xEB, 0xEB, 0xE7, 0xED, 0xE9, 0xEA, 0xDC];
    let mut data = b"<ul><li><object type=\"text/sitemap\"><param name=\"Name\" value=\"".to_vec();
    data.extend_from_slice(&greek);
    data.extend_from_slice(b"\"></object></ul>");

    let decoder = SitemapDecoder::with_encoding(Some(encoding_rs::WINDOWS_1253));
    let tree = TableOfContents::decode_with(&data, &decoder).unwrap();
    assert_eq!(tree.root_topics()[0].name, "Ελληνικά");
}

#[test]
fn test_edit_tree_after_build() {
    let toc = sitemap(&[(0, "A", ""), (1, "A.1", "a1.html")]);
    let (_file, archive) = open(with_sitemaps(&toc, "<ul></ul>"));
    let mut tree = TableOfContents::build(&archive).unwrap();

    let a = tree.root_topic_at_mut(0).unwrap();
    a.add_child(Topic::new("A.2", "a2.html"));
    a.insert_child(0, Topic::new("A.0", "a0.html")).unwrap();
    let removed = a.remove_child_at(1).unwrap();
    assert_eq!(removed.name, "A.1");

    tree.add_root_topic(Topic::new("B", "b.html"));
    let names: Vec<_> = tree.iter().map(|(_, t)| t.name.clone()).collect();
    assert_eq!(names, vec!["A", "A.0", "A.2", "B"]);
}

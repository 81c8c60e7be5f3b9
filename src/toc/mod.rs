//! Table of contents and keyword index trees.
//!
//! Topics own their children directly; there are no parent links, so the
//! tree is acyclic by construction. Decoding is pluggable through
//! [`TocDecoder`]; [`SitemapDecoder`] handles the usual `.hhc`/`.hhk` files.

mod sitemap;

pub use sitemap::SitemapDecoder;

use tracing::debug;

use crate::archive::{Archive, ContentSource};
use crate::error::{Error, Result};

/// Turns the raw bytes of a contents stream into root topics.
pub trait TocDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<Topic>>;
}

/// One entry of the navigation tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    /// Internal path of the target page, empty for pure grouping entries.
    pub location: String,
    children: Vec<Topic>,
}

impl Topic {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            children: Vec::new(),
        }
    }

    pub fn children(&self) -> &[Topic] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child_at(&self, index: usize) -> Result<&Topic> {
        let len = self.children.len();
        self.children
            .get(index)
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    pub fn child_at_mut(&mut self, index: usize) -> Result<&mut Topic> {
        let len = self.children.len();
        self.children
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    pub fn add_child(&mut self, topic: Topic) {
        self.children.push(topic);
    }

    /// Insert `topic` before position `index`; `index == child_count()` appends.
    pub fn insert_child(&mut self, index: usize, topic: Topic) -> Result<()> {
        let len = self.children.len();
        if index > len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        self.children.insert(index, topic);
        Ok(())
    }

    pub fn remove_child_at(&mut self, index: usize) -> Result<Topic> {
        let len = self.children.len();
        if index >= len {
            return Err(Error::IndexOutOfRange { index, len });
        }
        Ok(self.children.remove(index))
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(Topic::count).sum::<usize>()
    }
}

/// Ordered root topics of a contents or index stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOfContents {
    roots: Vec<Topic>,
}

impl TableOfContents {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table of contents of `archive`, empty when it declares none.
    pub fn build(archive: &Archive) -> Result<Self> {
        let decoder = SitemapDecoder::with_encoding(archive.metadata().encoding());
        Self::load(archive, archive.toc_path(), &decoder)
    }

    /// The keyword index of `archive`, empty when it declares none.
    pub fn build_index(archive: &Archive) -> Result<Self> {
        let decoder = SitemapDecoder::with_encoding(archive.metadata().encoding());
        Self::load(archive, archive.index_path(), &decoder)
    }

    /// Read and decode the stream at `path`; `None` gives an empty tree.
    pub fn load<S: ContentSource + ?Sized>(
        source: &S,
        path: Option<&str>,
        decoder: &dyn TocDecoder,
    ) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::new());
        };
        let data = source.read_object(path)?;
        let toc = Self::decode_with(&data, decoder)?;
        debug!(path, roots = toc.roots.len(), topics = toc.len(), "decoded navigation tree");
        Ok(toc)
    }

    pub fn decode_with(data: &[u8], decoder: &dyn TocDecoder) -> Result<Self> {
        Ok(Self {
            roots: decoder.decode(data)?,
        })
    }

    pub fn root_topics(&self) -> &[Topic] {
        &self.roots
    }

    pub fn root_topic_at_mut(&mut self, index: usize) -> Result<&mut Topic> {
        let len = self.roots.len();
        self.roots
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    pub fn add_root_topic(&mut self, topic: Topic) {
        self.roots.push(topic);
    }

    /// Total number of topics at every depth.
    pub fn len(&self) -> usize {
        self.roots.iter().map(Topic::count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Depth-first walk yielding `(depth, topic)`, roots at depth 0.
    pub fn iter(&self) -> Topics<'_> {
        Topics {
            stack: self.roots.iter().rev().map(|t| (0, t)).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TableOfContents {
    type Item = (usize, &'a Topic);
    type IntoIter = Topics<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`TableOfContents::iter`].
pub struct Topics<'a> {
    stack: Vec<(usize, &'a Topic)>,
}

impl<'a> Iterator for Topics<'a> {
    type Item = (usize, &'a Topic);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, topic) = self.stack.pop()?;
        self.stack
            .extend(topic.children.iter().rev().map(|c| (depth + 1, c)));
        Some((depth, topic))
    }
}

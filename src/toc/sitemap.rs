//! Decoder for the HTML sitemap format of `.hhc` contents and `.hhk` index
//! files.
//!
//! ```text
//! <UL>
//!   <LI> <OBJECT type="text/sitemap">
//!          <param name="Name" value="Chapter">
//!          <param name="Local" value="chapter.html">
//!        </OBJECT>
//!   <UL> ...children of "Chapter"... </UL>
//! </UL>
//! ```
//!
//! Sitemaps in the wild are rarely well formed, so the decoder runs the
//! html5ever tokenizer alone (no tree construction) and tracks `UL` nesting
//! itself. Unclosed objects end at the next `LI`, `OBJECT` or `UL` tag.

use std::cell::RefCell;

use encoding_rs::Encoding;
use html5ever::tendril::StrTendril;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use html5ever::TokenizerResult;
use tracing::{trace, warn};

use super::{TocDecoder, Topic};
use crate::error::Result;
use crate::util::decode_text;

/// Default [`TocDecoder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SitemapDecoder {
    encoding: Option<&'static Encoding>,
}

impl SitemapDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode non UTF-8 sitemaps with `encoding` instead of Windows-1252.
    pub fn with_encoding(encoding: Option<&'static Encoding>) -> Self {
        Self { encoding }
    }
}

impl TocDecoder for SitemapDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<Topic>> {
        let text = decode_text(data, self.encoding);

        let input = BufferQueue::default();
        input.push_back(StrTendril::from_slice(&text));
        let tokenizer = Tokenizer::new(SitemapSink::default(), TokenizerOpts::default());
        // The sink never yields scripts, so feeding stops only when input runs out.
        while let TokenizerResult::Script(()) = tokenizer.feed(&input) {}
        tokenizer.end();

        Ok(tokenizer.sink.finish())
    }
}

#[derive(Default)]
struct PendingObject {
    name: Option<String>,
    local: Option<String>,
}

/// Deepest `UL` nesting kept as tree structure. Lists opened below it are
/// flattened into the deepest level.
const MAX_LIST_DEPTH: usize = 256;

#[derive(Default)]
struct SitemapState {
    /// `levels[0]` collects root topics; every open `UL` adds a level.
    levels: Vec<Vec<Topic>>,
    /// `UL`s opened past [`MAX_LIST_DEPTH`] and not yet closed.
    flattened_lists: usize,
    object: Option<PendingObject>,
    /// Inside an `OBJECT` of some other type (e.g. site properties).
    foreign_object: bool,
}

impl SitemapState {
    fn current_level(&mut self) -> &mut Vec<Topic> {
        if self.levels.is_empty() {
            self.levels.push(Vec::new());
        }
        let last = self.levels.len() - 1;
        &mut self.levels[last]
    }

    fn open_list(&mut self) {
        self.finish_object();
        if self.levels.is_empty() {
            self.levels.push(Vec::new());
        }
        if self.levels.len() > MAX_LIST_DEPTH {
            if self.flattened_lists == 0 {
                warn!(depth = MAX_LIST_DEPTH, "sitemap nested too deeply, flattening");
            }
            self.flattened_lists += 1;
            return;
        }
        self.levels.push(Vec::new());
    }

    fn close_list(&mut self) {
        self.finish_object();
        if self.flattened_lists > 0 {
            self.flattened_lists -= 1;
            return;
        }
        if self.levels.len() < 2 {
            trace!("ignoring unmatched </ul>");
            return;
        }
        let Some(closed) = self.levels.pop() else {
            return;
        };
        let parent = self.current_level();
        match parent.last_mut() {
            Some(owner) => {
                for topic in closed {
                    owner.add_child(topic);
                }
            }
            // A list with no topic before it belongs to the enclosing level.
            None => parent.extend(closed),
        }
    }

    fn finish_object(&mut self) {
        if let Some(object) = self.object.take() {
            let topic = Topic::new(
                object.name.unwrap_or_default(),
                object.local.unwrap_or_default(),
            );
            self.current_level().push(topic);
        }
    }

    fn start_tag(&mut self, tag: &Tag) {
        match &*tag.name {
            "ul" => self.open_list(),
            "li" => self.finish_object(),
            "object" => {
                self.finish_object();
                let sitemap = attr(tag, "type")
                    .is_some_and(|t| t.eq_ignore_ascii_case("text/sitemap"));
                if sitemap {
                    self.object = Some(PendingObject::default());
                    self.foreign_object = false;
                } else {
                    self.foreign_object = true;
                }
            }
            "param" => {
                if self.foreign_object {
                    return;
                }
                let Some(object) = self.object.as_mut() else {
                    return;
                };
                let (Some(name), Some(value)) = (attr(tag, "name"), attr(tag, "value")) else {
                    return;
                };
                let slot = if name.eq_ignore_ascii_case("name") {
                    &mut object.name
                } else if name.eq_ignore_ascii_case("local") {
                    &mut object.local
                } else {
                    return;
                };
                // Later values (index "see also" names) do not replace the first.
                if slot.is_none() {
                    *slot = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    fn end_tag(&mut self, tag: &Tag) {
        match &*tag.name {
            "ul" => self.close_list(),
            "object" => {
                if self.foreign_object {
                    self.foreign_object = false;
                } else {
                    self.finish_object();
                }
            }
            _ => {}
        }
    }

    fn finish(mut self) -> Vec<Topic> {
        self.finish_object();
        while self.levels.len() > 1 {
            self.close_list();
        }
        self.levels.pop().unwrap_or_default()
    }
}

fn attr<'t>(tag: &'t Tag, name: &str) -> Option<&'t str> {
    tag.attrs
        .iter()
        .find(|a| a.name.local.as_ref().eq_ignore_ascii_case(name))
        .map(|a| &*a.value)
}

/// Tokenizer sink building the topic levels.
///
/// The tokenizer only hands out `&self`, so the state sits in a RefCell.
#[derive(Default)]
struct SitemapSink {
    state: RefCell<SitemapState>,
}

impl SitemapSink {
    fn finish(self) -> Vec<Topic> {
        self.state.into_inner().finish()
    }
}

impl TokenSink for SitemapSink {
    type Handle = ();

    fn process_token(&self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        if let Token::TagToken(tag) = token {
            let mut state = self.state.borrow_mut();
            match tag.kind {
                TagKind::StartTag => state.start_tag(&tag),
                TagKind::EndTag => state.end_tag(&tag),
            }
        }
        TokenSinkResult::Continue
    }
}

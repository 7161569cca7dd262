//! Markdown to [`Block`] conversion with an incremental cache.
//!
//! Text is split at its stable boundary into a finished prefix and a volatile
//! tail. The prefix's blocks are cached and handed out again by reference
//! while the prefix stays byte-identical; the tail is re-parsed on every call.
//! `parse` goes through the same split, so a full parse and any sequence of
//! incremental parses over the same text agree.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use log::{debug, error, trace};
use serde::Serialize;

use crate::block::{Block, BlockKind, ListItem, ListKind, TableCell, non_empty};
use crate::boundary::{has_incomplete_tail, stable_boundary};
use crate::config::ParserConfig;
use crate::footnotes;
use crate::inline::InlineParser;
use crate::language::normalize_language;
use crate::plain;
use crate::plugin::PluginRuntime;
use crate::references::{self, LinkDefinitions};
use crate::token::{Token, TokenKind, tokenize_with_links};

#[derive(Debug, Clone, PartialEq)]
pub struct ParserOptions {
    pub math: bool,
    pub footnotes: bool,
    pub language_aliases: HashMap<String, String>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            math: true,
            footnotes: true,
            language_aliases: HashMap::new(),
        }
    }
}

impl From<&ParserConfig> for ParserOptions {
    fn from(config: &ParserConfig) -> Self {
        Self {
            math: config.math,
            footnotes: config.footnotes,
            language_aliases: config.language_aliases.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseOutput {
    pub blocks: Vec<Arc<Block>>,
    pub has_incomplete_block: bool,
}

impl ParseOutput {
    /// The trailing block while it is still being written
    pub fn incomplete_block(&self) -> Option<&Arc<Block>> {
        self.blocks.last().filter(|b| !b.is_complete)
    }
}

#[derive(Debug, Clone, Default)]
struct ParseCache {
    parsed_text: String,
    stable_text_end: usize,
    stable_blocks: Vec<Arc<Block>>,
    stable_footnotes: BTreeMap<String, String>,
    /// Link definitions the stable blocks were resolved against
    links: LinkDefinitions,
}

impl ParseCache {
    fn covers(&self, text: &str, boundary: usize, links: &LinkDefinitions) -> bool {
        self.stable_text_end == boundary
            && self.parsed_text.get(..boundary) == text.get(..boundary)
            && self.links == *links
    }
}

/// Blocks and footnote definitions parsed from one slice of the text
#[derive(Debug, Default)]
struct Segment {
    blocks: Vec<Block>,
    footnotes: BTreeMap<String, String>,
}

/// Streaming-aware block parser. Keep one per stream.
#[derive(Debug, Default)]
pub struct BlockParser {
    runtime: Option<Arc<PluginRuntime>>,
    options: ParserOptions,
    cache: Option<ParseCache>,
    /// Segment position whose parse panics, to exercise the fallbacks
    #[cfg(test)]
    fail_segment_at: Option<usize>,
}

impl BlockParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime(mut self, runtime: Arc<PluginRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_options(mut self, options: ParserOptions) -> Self {
        self.options = options;
        self.cache = None;
        self
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    pub fn runtime(&self) -> Option<&Arc<PluginRuntime>> {
        self.runtime.as_ref()
    }

    /// Offset of the stable prefix held in the cache, if any
    pub fn cached_boundary(&self) -> Option<usize> {
        self.cache.as_ref().map(|c| c.stable_text_end)
    }

    /// Parse `text` from scratch, replacing whatever the cache held.
    pub fn parse(&mut self, text: &str) -> ParseOutput {
        self.cache = None;
        self.parse_with_cache(text)
    }

    /// Parse `new_text`, which normally is `prev_text` with more appended.
    /// Anything other than a pure append falls back to a full parse.
    pub fn parse_incremental(&mut self, prev_text: &str, new_text: &str) -> ParseOutput {
        if prev_text.is_empty() || !new_text.starts_with(prev_text) {
            debug!(
                "full reparse: {} bytes (previous text {})",
                new_text.len(),
                if prev_text.is_empty() { "empty" } else { "diverged" }
            );
            return self.parse(new_text);
        }
        self.parse_with_cache(new_text)
    }

    /// Drop the cache. The next parse starts from nothing.
    pub fn reset(&mut self) {
        self.cache = None;
    }

    fn parse_with_cache(&mut self, text: &str) -> ParseOutput {
        let boundary = stable_boundary(text);
        let links = references::collect(text);

        let (stable_blocks, stable_footnotes) = match self.cache.take() {
            Some(cache) if cache.covers(text, boundary, &links) => {
                trace!("reusing {} stable blocks up to {boundary}", cache.stable_blocks.len());
                (cache.stable_blocks, cache.stable_footnotes)
            }
            _ => match self.guarded_segment(&text[..boundary], 0, &links) {
                Some(segment) => (
                    segment.blocks.into_iter().map(Arc::new).collect::<Vec<_>>(),
                    segment.footnotes,
                ),
                None => return ParseOutput::default(),
            },
        };

        self.cache = Some(ParseCache {
            parsed_text: text.to_string(),
            stable_text_end: boundary,
            stable_blocks: stable_blocks.clone(),
            stable_footnotes: stable_footnotes.clone(),
            links: links.clone(),
        });

        let Some(tail) = self.guarded_segment(&text[boundary..], stable_blocks.len(), &links) else {
            return ParseOutput {
                blocks: stable_blocks,
                has_incomplete_block: false,
            };
        };

        let mut footnotes = stable_footnotes;
        for (id, definition) in tail.footnotes {
            footnotes.entry(id).or_insert(definition);
        }

        let mut blocks = stable_blocks;
        blocks.extend(tail.blocks.into_iter().map(Arc::new));
        assemble(blocks, footnotes, has_incomplete_tail(text))
    }

    /// Parse one slice, containing any panic from the tokenizer or plugin-free
    /// conversion code so the caller can fall back.
    fn guarded_segment(
        &self,
        text: &str,
        first_position: usize,
        links: &LinkDefinitions,
    ) -> Option<Segment> {
        if text.is_empty() {
            return Some(Segment::default());
        }
        match catch_unwind(AssertUnwindSafe(|| self.segment(text, first_position, links))) {
            Ok(segment) => Some(segment),
            Err(_) => {
                error!("failed to parse {} bytes of markdown, keeping earlier blocks", text.len());
                None
            }
        }
    }

    fn segment(&self, text: &str, first_position: usize, links: &LinkDefinitions) -> Segment {
        #[cfg(test)]
        if self.fail_segment_at == Some(first_position) {
            panic!("tokenizer failure at block {first_position}");
        }

        let (source, footnotes) = if self.options.footnotes {
            let prepared = footnotes::prepare(text);
            (Cow::Owned(prepared.text), prepared.definitions)
        } else {
            (Cow::Borrowed(text), BTreeMap::new())
        };

        let tokens = tokenize_with_links(&source, links);
        let converter = Converter {
            runtime: self.runtime.as_deref(),
            options: &self.options,
        };
        let mut blocks = converter.blocks(&tokens);
        for (i, block) in blocks.iter_mut().enumerate() {
            block.assign_position(first_position + i, None);
        }
        Segment { blocks, footnotes }
    }
}

/// Final ordering: content blocks, then the footnote block, with the
/// incomplete block (if any) kept last.
fn assemble(
    mut blocks: Vec<Arc<Block>>,
    footnotes: BTreeMap<String, String>,
    has_incomplete: bool,
) -> ParseOutput {
    let incomplete = if has_incomplete { blocks.pop() } else { None };

    if !footnotes.is_empty() {
        let content = plain::footnotes_to_plain(&footnotes);
        let mut block = Block::new(
            BlockKind::FootnoteDef {
                footnote_defs: footnotes,
            },
            content,
        );
        block.assign_position(blocks.len(), None);
        blocks.push(Arc::new(block));
    }

    let has_incomplete_block = incomplete.is_some();
    if let Some(last) = incomplete {
        let mut last = Arc::unwrap_or_clone(last);
        last.is_complete = false;
        last.assign_position(blocks.len(), None);
        blocks.push(Arc::new(last));
    }

    ParseOutput {
        blocks,
        has_incomplete_block,
    }
}

/// Token to block conversion for one parse
struct Converter<'a> {
    runtime: Option<&'a PluginRuntime>,
    options: &'a ParserOptions,
}

impl Converter<'_> {
    fn blocks(&self, tokens: &[Token]) -> Vec<Block> {
        tokens.iter().filter_map(|t| self.block(t)).collect()
    }

    fn inlines(&self, tokens: &[Token]) -> Vec<crate::block::Inline> {
        InlineParser::new(self.runtime, self.options.math).parse(tokens)
    }

    fn block(&self, token: &Token) -> Option<Block> {
        if let Some(runtime) = self.runtime {
            if let Some(block) = runtime.dispatch_block(token) {
                let mut block = block.sanitize();
                plain::refresh_content(&mut block);
                return Some(block);
            }
        }
        if token.is_blank() {
            return None;
        }

        let block = match &token.kind {
            TokenKind::Paragraph => {
                let children = self.inlines(&token.children);
                if children.is_empty() {
                    return None;
                }
                Block::paragraph(children)
            }
            TokenKind::Heading { level } => Block::heading(*level, self.inlines(&token.children)),
            TokenKind::CodeBlock { info } => {
                let text = token.plain_text();
                let raw = text.strip_suffix('\n').unwrap_or(&text);
                let language = info
                    .as_deref()
                    .and_then(|info| normalize_language(info, &self.options.language_aliases));
                Block::code(raw, language)
            }
            TokenKind::HtmlBlock | TokenKind::Html => {
                Block::new(BlockKind::Html, token.plain_text().trim_end())
            }
            TokenKind::List { start } => self.list(token, *start),
            TokenKind::BlockQuote => {
                let blocks = self.blocks(&token.children);
                let content = plain::blocks_to_plain(&blocks);
                Block::new(BlockKind::Blockquote { blocks }, content)
            }
            TokenKind::Table { align } => self.table(token, align),
            TokenKind::Rule => Block::new(BlockKind::ThematicBreak, ""),
            kind if is_inline(kind) => {
                // Stray inline content at block level reads as a paragraph.
                let children = self.inlines(std::slice::from_ref(token));
                if children.is_empty() {
                    return None;
                }
                Block::paragraph(children)
            }
            _ => {
                trace!("unsupported token '{}'", token.name());
                Block::new(
                    BlockKind::Unknown {
                        token_type: token.name().to_string(),
                    },
                    token.plain_text(),
                )
            }
        };
        Some(block)
    }

    fn list(&self, token: &Token, start: Option<u64>) -> Block {
        let items: Vec<ListItem> = token
            .children
            .iter()
            .filter(|t| t.kind == TokenKind::Item)
            .map(|item| self.list_item(item))
            .collect();
        let content = plain::list_to_plain(&items);
        let subtype = if start.is_some() {
            ListKind::Ordered
        } else {
            ListKind::Unordered
        };
        Block::new(
            BlockKind::List {
                subtype,
                start,
                items,
            },
            content,
        )
    }

    /// Tight items hold inline tokens directly; loose ones wrap the first run
    /// in a paragraph. Either way that leading run becomes the item's text and
    /// whatever follows becomes nested blocks.
    fn list_item(&self, token: &Token) -> ListItem {
        let mut checked = None;
        let mut inline_tokens: Vec<Token> = Vec::new();
        let mut blocks = Vec::new();
        let mut lead_taken = false;

        for child in &token.children {
            match &child.kind {
                TokenKind::TaskMarker { checked: c } => checked = Some(*c),
                TokenKind::Paragraph if !lead_taken && blocks.is_empty() && inline_tokens.is_empty() => {
                    for grandchild in &child.children {
                        if let TokenKind::TaskMarker { checked: c } = grandchild.kind {
                            checked = Some(c);
                        }
                    }
                    inline_tokens.extend(child.children.iter().cloned());
                    lead_taken = true;
                }
                kind if is_inline(kind) && !lead_taken && blocks.is_empty() => {
                    inline_tokens.push(child.clone());
                }
                _ => {
                    lead_taken = true;
                    blocks.extend(self.block(child));
                }
            }
        }

        let children = self.inlines(&inline_tokens);
        ListItem {
            id: String::new(),
            content: plain::inlines_to_plain(&children),
            children: non_empty(children),
            blocks: non_empty(blocks),
            checked,
        }
    }

    fn table(&self, token: &Token, align: &[crate::block::Alignment]) -> Block {
        let mut headers = Vec::new();
        let mut rows = Vec::new();
        for child in &token.children {
            match child.kind {
                TokenKind::TableHead => {
                    // The head holds its cells directly or wrapped in one row.
                    let row = child
                        .children
                        .iter()
                        .find(|c| c.kind == TokenKind::TableRow)
                        .unwrap_or(child);
                    headers = self.cells(row);
                }
                TokenKind::TableRow => rows.push(self.cells(child)),
                _ => {}
            }
        }
        let content = plain::table_to_plain(&headers, &rows);
        Block::new(
            BlockKind::Table {
                headers,
                rows,
                align: align.to_vec(),
            },
            content,
        )
    }

    fn cells(&self, row: &Token) -> Vec<TableCell> {
        row.children
            .iter()
            .filter(|c| c.kind == TokenKind::TableCell)
            .map(|c| TableCell::from_inlines(self.inlines(&c.children)))
            .collect()
    }
}

fn is_inline(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Text
            | TokenKind::Code
            | TokenKind::InlineHtml
            | TokenKind::SoftBreak
            | TokenKind::HardBreak
            | TokenKind::Emphasis
            | TokenKind::Strong
            | TokenKind::Strikethrough
            | TokenKind::Link { .. }
            | TokenKind::Image { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockType, Inline, InlineKind};
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> ParseOutput {
        BlockParser::new().parse(text)
    }

    fn ids(output: &ParseOutput) -> Vec<&str> {
        output.blocks.iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn test_basic_document() {
        let out = parse("# Title\n\nSome text\n\n---\n\n```py\nprint(1)\n```\n");
        assert_eq!(
            ids(&out),
            vec!["heading-0", "paragraph-1", "thematic-break-2", "code-3"]
        );
        assert!(!out.has_incomplete_block);
        assert!(out.blocks.iter().all(|b| b.is_complete));
        match &out.blocks[3].kind {
            BlockKind::Code {
                raw_content,
                language,
            } => {
                assert_eq!(raw_content, "print(1)");
                assert_eq!(language.as_deref(), Some("python"));
            }
            other => panic!("expected code, got {other:?}"),
        }
    }

    #[test]
    fn test_whitespace_only_input_yields_nothing() {
        let out = parse("   \n\n  \n");
        assert!(out.blocks.is_empty());
        assert!(!out.has_incomplete_block);
    }

    #[test]
    fn test_unclosed_fence_is_incomplete() {
        let out = parse("Intro\n\n```rust\nfn main() {\n\n    let x = 1;\n");
        assert!(out.has_incomplete_block);
        let last = out.blocks.last().unwrap();
        assert_eq!(last.block_type(), BlockType::Code);
        assert!(!last.is_complete);
        assert!(last.content.contains("let x = 1;"));
        assert_eq!(out.blocks.iter().filter(|b| !b.is_complete).count(), 1);
    }

    #[test]
    fn test_bare_heading_marker_is_incomplete() {
        let out = parse("Done paragraph\n\n##");
        assert!(out.has_incomplete_block);
        assert_eq!(out.incomplete_block().unwrap().block_type(), BlockType::Heading);
    }

    #[test]
    fn test_language_is_normalized() {
        let out = parse("```JS {highlight: 1}\nx\n```\n");
        match &out.blocks[0].kind {
            BlockKind::Code { language, .. } => assert_eq!(language.as_deref(), Some("javascript")),
            other => panic!("expected code, got {other:?}"),
        }
    }

    #[test]
    fn test_custom_language_alias() {
        let mut options = ParserOptions::default();
        options.language_aliases.insert("tsx".into(), "typescript".into());
        let out = BlockParser::new()
            .with_options(options)
            .parse("```tsx\n<A/>\n```\n");
        match &out.blocks[0].kind {
            BlockKind::Code { language, .. } => assert_eq!(language.as_deref(), Some("typescript")),
            other => panic!("expected code, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_ids() {
        let out = parse("> quoted\n>\n> - a\n> - b\n");
        let quote = &out.blocks[0];
        assert_eq!(quote.id, "blockquote-0");
        let BlockKind::Blockquote { blocks } = &quote.kind else {
            panic!("expected blockquote");
        };
        assert_eq!(blocks[0].id, "blockquote-0/paragraph-0");
        assert_eq!(blocks[1].id, "blockquote-0/list-1");
        let BlockKind::List { items, .. } = &blocks[1].kind else {
            panic!("expected list");
        };
        assert_eq!(items[1].id, "blockquote-0/list-1/item-1");
        assert_eq!(items[1].content, "b");
    }

    #[test]
    fn test_task_list_and_nested_list() {
        let out = parse("- [x] done\n- [ ] todo\n  - sub\n");
        let BlockKind::List { subtype, items, .. } = &out.blocks[0].kind else {
            panic!("expected list");
        };
        assert_eq!(*subtype, ListKind::Unordered);
        assert_eq!(items[0].checked, Some(true));
        assert_eq!(items[0].content, "done");
        assert_eq!(items[1].checked, Some(false));
        let nested = items[1].blocks.as_ref().unwrap();
        assert_eq!(nested[0].block_type(), BlockType::List);
        assert_eq!(nested[0].id, "list-0/item-1/list-0");
    }

    #[test]
    fn test_ordered_list_start() {
        let out = parse("3. c\n4. d\n");
        let BlockKind::List { subtype, start, items } = &out.blocks[0].kind else {
            panic!("expected list");
        };
        assert_eq!(*subtype, ListKind::Ordered);
        assert_eq!(*start, Some(3));
        assert_eq!(items.len(), 2);
        assert_eq!(out.blocks[0].content, "c\nd");
    }

    #[test]
    fn test_table() {
        let out = parse("| a | *b* |\n|:--|--:|\n| 1 | 2 |\n");
        let BlockKind::Table { headers, rows, align } = &out.blocks[0].kind else {
            panic!("expected table");
        };
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1].content, "b");
        assert_eq!(rows, &vec![vec![TableCell::from_inlines(vec![Inline::text("1")]), TableCell::from_inlines(vec![Inline::text("2")])]]);
        assert_eq!(align.len(), 2);
        assert_eq!(out.blocks[0].content, "a\tb\n1\t2");
    }

    #[test]
    fn test_html_block_is_kept_as_text() {
        let out = parse("<div>\nhi\n</div>\n");
        assert_eq!(out.blocks[0].block_type(), BlockType::Html);
        assert_eq!(out.blocks[0].content, "<div>\nhi\n</div>");
    }

    #[test]
    fn test_footnotes() {
        let out = parse("See[^a].\n\n[^a]: Note text");
        assert_eq!(ids(&out), vec!["paragraph-0", "footnote-def-1"]);
        let spans = out.blocks[0].inlines().unwrap();
        assert_eq!(spans[1], Inline::footnote_ref("a"));
        match &out.blocks[1].kind {
            BlockKind::FootnoteDef { footnote_defs } => {
                assert_eq!(footnote_defs.get("a").map(String::as_str), Some("Note text"));
            }
            other => panic!("expected footnote-def, got {other:?}"),
        }
    }

    #[test]
    fn test_link_definition_in_later_segment_resolves() {
        let out = parse("See [docs][d] here\n\n[d]: https://x.dev\n");
        assert_eq!(ids(&out), vec!["paragraph-0"]);
        let spans = out.blocks[0].inlines().unwrap();
        assert_eq!(
            spans[1],
            Inline::nested(
                InlineKind::Link {
                    href: "https://x.dev".into(),
                    title: None,
                },
                vec![Inline::text("docs")],
            )
        );
    }

    #[test]
    fn test_changed_link_definition_refreshes_stable_blocks() {
        let mut parser = BlockParser::new();
        parser.parse_incremental("", "See [docs][d]\n\n[d]: /do");
        assert_eq!(parser.cached_boundary(), Some(15));

        let text = "See [docs][d]\n\n[d]: /docs";
        let out = parser.parse_incremental("See [docs][d]\n\n[d]: /do", text);
        assert_eq!(out, parse(text));
        match &out.blocks[0].inlines().unwrap()[1].kind {
            InlineKind::Link { href, .. } => assert_eq!(href, "/docs"),
            other => panic!("expected link, got {other:?}"),
        }
    }

    #[test]
    fn test_footnote_continuation_paragraph_is_not_code() {
        let out = parse("Text[^a]\n\n[^a]: first para\n\n    second para of note\n");
        assert_eq!(ids(&out), vec!["paragraph-0", "footnote-def-1"]);
        match &out.blocks[1].kind {
            BlockKind::FootnoteDef { footnote_defs } => {
                assert_eq!(footnote_defs["a"], "first para\n\nsecond para of note");
            }
            other => panic!("expected footnote-def, got {other:?}"),
        }
    }

    #[test]
    fn test_pre_block_with_blank_line_stays_whole() {
        let out = parse("<pre>\nline1\n\nline2\n</pre>\n\nafter");
        assert_eq!(ids(&out), vec!["html-0", "paragraph-1"]);
        assert_eq!(out.blocks[0].content, "<pre>\nline1\n\nline2\n</pre>");
        assert_eq!(out.blocks[1].content, "after");
    }

    #[test]
    fn test_tail_failure_keeps_stable_blocks() {
        let mut parser = BlockParser {
            fail_segment_at: Some(2),
            ..BlockParser::default()
        };
        let out = parser.parse("One\n\nTwo\n\n```\ntail");
        assert_eq!(ids(&out), vec!["paragraph-0", "paragraph-1"]);
        assert!(!out.has_incomplete_block);
        assert!(out.blocks.iter().all(|b| b.is_complete));
    }

    #[test]
    fn test_prefix_failure_yields_empty_output() {
        let mut parser = BlockParser {
            fail_segment_at: Some(0),
            ..BlockParser::default()
        };
        assert_eq!(parser.parse("One\n\nTwo"), ParseOutput::default());
    }

    #[test]
    fn test_footnote_block_precedes_incomplete_block() {
        let out = parse("A[^n]\n\n[^n]: note\n\n```\nstill typing");
        assert_eq!(ids(&out), vec!["paragraph-0", "footnote-def-1", "code-2"]);
        assert!(!out.blocks[2].is_complete);
    }

    #[test]
    fn test_footnotes_can_be_disabled() {
        let out = BlockParser::new()
            .with_options(ParserOptions {
                footnotes: false,
                ..ParserOptions::default()
            })
            .parse("See[^a].\n\n[^a]: Note text");
        assert!(
            out.blocks
                .iter()
                .all(|b| b.block_type() != BlockType::FootnoteDef)
        );
    }

    #[test]
    fn test_incremental_reuses_stable_blocks() {
        let mut parser = BlockParser::new();
        let first = parser.parse_incremental("", "One\n\nTwo\n\nThr");
        assert_eq!(parser.cached_boundary(), Some(10));
        let second = parser.parse_incremental("One\n\nTwo\n\nThr", "One\n\nTwo\n\nThree");
        assert!(Arc::ptr_eq(&first.blocks[0], &second.blocks[0]));
        assert!(Arc::ptr_eq(&first.blocks[1], &second.blocks[1]));
        assert_eq!(second.blocks[2].content, "Three");
    }

    #[test]
    fn test_incremental_matches_full_parse() {
        let text = "# T\n\nPara with $x$ and **bold**\n\n- a\n- b\n\n> q\n\n```js\nlet a\n```\nend";
        let full = parse(text);
        for k in 0..=text.len() {
            if !text.is_char_boundary(k) {
                continue;
            }
            let mut parser = BlockParser::new();
            parser.parse_incremental("", &text[..k]);
            let inc = parser.parse_incremental(&text[..k], text);
            assert_eq!(inc, full, "split at {k}");
        }
    }

    #[test]
    fn test_non_append_forces_full_reparse() {
        let mut parser = BlockParser::new();
        parser.parse_incremental("", "Alpha\n\nBeta");
        let out = parser.parse_incremental("Alpha\n\nBeta", "Gamma\n\nBeta");
        assert_eq!(out.blocks[0].content, "Gamma");
    }

    #[test]
    fn test_reset_clears_cache() {
        let mut parser = BlockParser::new();
        parser.parse("a\n\nb");
        assert!(parser.cached_boundary().is_some());
        parser.reset();
        assert_eq!(parser.cached_boundary(), None);
    }

    #[test]
    fn test_math_in_heading() {
        let out = parse("## Area $\\pi r^2$\n");
        let spans = out.blocks[0].inlines().unwrap();
        assert_eq!(spans[1].kind, InlineKind::Math { display_mode: false });
        assert_eq!(spans[1].content, "\\pi r^2");
    }

    #[test]
    fn test_extension_blocks_get_plain_content() {
        use crate::error::ExtensionResult;
        use crate::plugin::{BlockExtension, Plugin};

        struct Shout;

        impl BlockExtension for Shout {
            fn name(&self) -> &str {
                "shout"
            }

            fn token_type(&self) -> Option<&str> {
                Some("paragraph")
            }

            fn parse(&self, token: &Token) -> ExtensionResult<Option<Block>> {
                let text = token.plain_text();
                Ok(text
                    .strip_prefix("!! ")
                    .map(|rest| {
                        let children = vec![Inline::text(rest.to_uppercase()), Inline::text("")];
                        Block::new(
                            BlockKind::Heading {
                                level: 1,
                                children: Some(children),
                            },
                            "",
                        )
                    }))
            }
        }

        let runtime = PluginRuntime::new(vec![Plugin::new("shout").block_extension(Shout)]).unwrap();
        let out = BlockParser::new()
            .with_runtime(Arc::new(runtime))
            .parse("!! hello\n\nquiet\n");
        assert_eq!(out.blocks[0].block_type(), BlockType::Heading);
        assert_eq!(out.blocks[0].content, "HELLO");
        assert_eq!(out.blocks[0].inlines().unwrap(), &[Inline::text("HELLO")]);
        assert_eq!(out.blocks[1].block_type(), BlockType::Paragraph);
    }
}

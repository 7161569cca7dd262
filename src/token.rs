//! Adapter from pulldown-cmark's event stream to an owned token tree.
//!
//! The rest of the crate, including plugin extensions, only ever sees
//! [`Token`]; nothing outside this module names pulldown-cmark types.

use std::ops::Range;

use pulldown_cmark::{BrokenLink, CodeBlockKind, CowStr, Event, HeadingLevel, Options, Parser, Tag};

use crate::block::Alignment;
use crate::references::{LinkDefinitions, normalize_label};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Paragraph,
    Heading { level: u8 },
    /// `info` is the raw fence info string, `None` for indented code
    CodeBlock { info: Option<String> },
    HtmlBlock,
    List { start: Option<u64> },
    Item,
    BlockQuote,
    Table { align: Vec<Alignment> },
    TableHead,
    TableRow,
    TableCell,
    Rule,
    Text,
    Code,
    /// A chunk of block-level HTML
    Html,
    InlineHtml,
    SoftBreak,
    HardBreak,
    Emphasis,
    Strong,
    Strikethrough,
    Link { href: String, title: Option<String> },
    Image { src: String, title: Option<String> },
    TaskMarker { checked: bool },
    /// Anything the adapter has no dedicated shape for
    Other { tag: String },
}

impl TokenKind {
    /// Stable type name, used by extension type filters
    pub fn name(&self) -> &str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Heading { .. } => "heading",
            Self::CodeBlock { .. } => "code_block",
            Self::HtmlBlock => "html_block",
            Self::List { .. } => "list",
            Self::Item => "item",
            Self::BlockQuote => "blockquote",
            Self::Table { .. } => "table",
            Self::TableHead => "table_head",
            Self::TableRow => "table_row",
            Self::TableCell => "table_cell",
            Self::Rule => "rule",
            Self::Text => "text",
            Self::Code => "code",
            Self::Html => "html",
            Self::InlineHtml => "inline_html",
            Self::SoftBreak => "soft_break",
            Self::HardBreak => "hard_break",
            Self::Emphasis => "emphasis",
            Self::Strong => "strong",
            Self::Strikethrough => "strikethrough",
            Self::Link { .. } => "link",
            Self::Image { .. } => "image",
            Self::TaskMarker { .. } => "task_marker",
            Self::Other { tag } => tag,
        }
    }

    fn merges_with(&self, other: &TokenKind) -> bool {
        matches!(
            (self, other),
            (Self::Text, Self::Text) | (Self::Html, Self::Html)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Source text the token was produced from
    pub raw: String,
    /// Literal text for leaf tokens, empty for containers
    pub text: String,
    pub children: Vec<Token>,
}

impl Token {
    pub fn new(kind: TokenKind, raw: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.into(),
            text: text.into(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }

    /// All literal text below this token, concatenated
    pub fn plain_text(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            match child.kind {
                TokenKind::SoftBreak | TokenKind::HardBreak => out.push('\n'),
                _ => out.push_str(&child.plain_text()),
            }
        }
        out
    }

    /// True when the token holds nothing but whitespace
    pub fn is_blank(&self) -> bool {
        match self.kind {
            TokenKind::Text
            | TokenKind::Html
            | TokenKind::SoftBreak
            | TokenKind::HardBreak
            | TokenKind::Paragraph
            | TokenKind::HtmlBlock
            | TokenKind::Emphasis
            | TokenKind::Strong
            | TokenKind::Strikethrough => {
                self.text.trim().is_empty() && self.children.iter().all(Token::is_blank)
            }
            _ => false,
        }
    }

    fn push_child(&mut self, child: Token) {
        if let Some(last) = self.children.last_mut() {
            if last.kind.merges_with(&child.kind) {
                last.text.push_str(&child.text);
                last.raw.push_str(&child.raw);
                return;
            }
        }
        self.children.push(child);
    }
}

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

/// Tokenize markdown into top-level block tokens
pub fn tokenize(markdown: &str) -> Vec<Token> {
    tokenize_with_links(markdown, &LinkDefinitions::new())
}

/// Tokenize, resolving references that `markdown` itself does not define
/// from `links`.
pub fn tokenize_with_links(markdown: &str, links: &LinkDefinitions) -> Vec<Token> {
    let resolve = |link: BrokenLink<'_>| {
        links.get(&normalize_label(&link.reference)).map(|target| {
            (
                CowStr::from(target.url.clone()),
                CowStr::from(target.title.clone()),
            )
        })
    };
    let parser =
        Parser::new_with_broken_link_callback(markdown, options(), Some(resolve)).into_offset_iter();
    let mut stack = vec![Token::new(TokenKind::Other { tag: "root".into() }, "", "")];

    for (event, range) in parser {
        let raw = markdown.get(range.clone()).unwrap_or_default();
        match event {
            Event::Start(tag) => {
                stack.push(Token::new(kind_for_tag(tag), raw, ""));
            }
            Event::End(_) => close_top(&mut stack),
            Event::Text(text) => {
                let text = restore_dollar_escapes(markdown, range, &text);
                push_leaf(&mut stack, Token::new(TokenKind::Text, raw, text));
            }
            Event::Code(code) => {
                push_leaf(&mut stack, Token::new(TokenKind::Code, raw, code.into_string()));
            }
            Event::Html(html) => {
                push_leaf(&mut stack, Token::new(TokenKind::Html, raw, html.into_string()));
            }
            Event::InlineHtml(html) => {
                push_leaf(
                    &mut stack,
                    Token::new(TokenKind::InlineHtml, raw, html.into_string()),
                );
            }
            Event::SoftBreak => push_leaf(&mut stack, Token::new(TokenKind::SoftBreak, raw, "")),
            Event::HardBreak => push_leaf(&mut stack, Token::new(TokenKind::HardBreak, raw, "")),
            Event::Rule => push_leaf(&mut stack, Token::new(TokenKind::Rule, raw, "")),
            Event::TaskListMarker(checked) => {
                push_leaf(&mut stack, Token::new(TokenKind::TaskMarker { checked }, raw, ""));
            }
            _ => {
                log::trace!("Unmapped tokenizer event at {:?}", range);
                push_leaf(
                    &mut stack,
                    Token::new(TokenKind::Other { tag: "event".into() }, raw, raw),
                );
            }
        }
    }

    // The tokenizer always balances its events; this only guards truncation.
    while stack.len() > 1 {
        close_top(&mut stack);
    }
    stack.pop().map(|root| root.children).unwrap_or_default()
}

fn close_top(stack: &mut Vec<Token>) {
    if stack.len() < 2 {
        return;
    }
    if let Some(token) = stack.pop() {
        push_leaf(stack, token);
    }
}

fn push_leaf(stack: &mut [Token], token: Token) {
    if let Some(parent) = stack.last_mut() {
        parent.push_child(token);
    }
}

fn kind_for_tag(tag: Tag<'_>) -> TokenKind {
    match tag {
        Tag::Paragraph => TokenKind::Paragraph,
        Tag::Heading { level, .. } => TokenKind::Heading {
            level: heading_level_to_u8(level),
        },
        Tag::BlockQuote(_) => TokenKind::BlockQuote,
        Tag::CodeBlock(kind) => TokenKind::CodeBlock {
            info: match kind {
                CodeBlockKind::Fenced(info) => Some(info.into_string()),
                CodeBlockKind::Indented => None,
            },
        },
        Tag::HtmlBlock => TokenKind::HtmlBlock,
        Tag::List(start) => TokenKind::List { start },
        Tag::Item => TokenKind::Item,
        Tag::Table(align) => TokenKind::Table {
            align: align.into_iter().map(convert_alignment).collect(),
        },
        Tag::TableHead => TokenKind::TableHead,
        Tag::TableRow => TokenKind::TableRow,
        Tag::TableCell => TokenKind::TableCell,
        Tag::Emphasis => TokenKind::Emphasis,
        Tag::Strong => TokenKind::Strong,
        Tag::Strikethrough => TokenKind::Strikethrough,
        Tag::Link {
            dest_url, title, ..
        } => TokenKind::Link {
            href: dest_url.into_string(),
            title: non_empty_title(title.into_string()),
        },
        Tag::Image {
            dest_url, title, ..
        } => TokenKind::Image {
            src: dest_url.into_string(),
            title: non_empty_title(title.into_string()),
        },
        other => TokenKind::Other {
            tag: format!("{other:?}")
                .split(['(', ' ', '{'])
                .next()
                .unwrap_or("unknown")
                .to_lowercase(),
        },
    }
}

fn non_empty_title(title: String) -> Option<String> {
    if title.is_empty() { None } else { Some(title) }
}

fn convert_alignment(align: pulldown_cmark::Alignment) -> Alignment {
    match align {
        pulldown_cmark::Alignment::None => Alignment::None,
        pulldown_cmark::Alignment::Left => Alignment::Left,
        pulldown_cmark::Alignment::Center => Alignment::Center,
        pulldown_cmark::Alignment::Right => Alignment::Right,
    }
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// The tokenizer resolves `\$` to `$`; put the backslash back so the math
/// scanner can tell an escaped dollar from a delimiter.
fn restore_dollar_escapes(source: &str, range: Range<usize>, text: &str) -> String {
    let raw = source.get(range.clone()).unwrap_or_default();

    if raw.contains("\\$") {
        let mut candidate = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            match (c, chars.peek()) {
                ('\\', Some('$')) => {
                    candidate.push_str("\\$");
                    chars.next();
                }
                ('\\', Some(&next)) if next.is_ascii_punctuation() => {
                    candidate.push(next);
                    chars.next();
                }
                _ => candidate.push(c),
            }
        }
        // Only trust the rebuild when it spans exactly this text event; the
        // raw range can also cover entity references or a split event.
        if candidate.replace("\\$", "$") == text {
            return candidate;
        }
    }

    let bytes = source.as_bytes();
    let start = range.start;
    let escaped_before = start >= 1
        && bytes[start - 1] == b'\\'
        && !(start >= 2 && bytes[start - 2] == b'\\');
    if escaped_before && text.starts_with('$') && raw.starts_with('$') {
        return format!("\\{text}");
    }
    text.to_string()
}

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Inline span kinds. Type-specific fields live on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InlineKind {
    Text,
    Bold,
    Italic,
    Strikethrough,
    Code,
    Link {
        href: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Image {
        src: String,
        alt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Math {
        display_mode: bool,
    },
    HardBreak,
    Sup,
    Sub,
    FootnoteRef {
        id: String,
    },
}

impl InlineKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Bold => "bold",
            Self::Italic => "italic",
            Self::Strikethrough => "strikethrough",
            Self::Code => "code",
            Self::Link { .. } => "link",
            Self::Image { .. } => "image",
            Self::Math { .. } => "math",
            Self::HardBreak => "hard-break",
            Self::Sup => "sup",
            Self::Sub => "sub",
            Self::FootnoteRef { .. } => "footnote-ref",
        }
    }
}

/// Inline text span with formatting.
///
/// `content` is the flattened text of the span; `children` is only present for
/// spans that nest and is never an empty vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inline {
    #[serde(flatten)]
    pub kind: InlineKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Inline>>,
}

impl Inline {
    pub fn new(kind: InlineKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            children: None,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(InlineKind::Text, content)
    }

    pub fn code(content: impl Into<String>) -> Self {
        Self::new(InlineKind::Code, content)
    }

    pub fn math(content: impl Into<String>, display_mode: bool) -> Self {
        Self::new(InlineKind::Math { display_mode }, content)
    }

    pub fn hard_break() -> Self {
        Self::new(InlineKind::HardBreak, "\n")
    }

    pub fn footnote_ref(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(InlineKind::FootnoteRef { id: id.clone() }, id)
    }

    /// A nesting span whose content is the flattened text of its children.
    pub fn nested(kind: InlineKind, children: Vec<Inline>) -> Self {
        let content = crate::plain::inlines_to_plain(&children);
        Self {
            kind,
            content,
            children: non_empty(children),
        }
    }
}

/// List flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Ordered,
    Unordered,
}

/// A single list item, which can contain nested content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListItem {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Inline>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Block>>,
    /// For task lists: None = not a task, Some(false) = unchecked, Some(true) = checked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
}

impl ListItem {
    pub fn is_task(&self) -> bool {
        self.checked.is_some()
    }
}

/// Column alignment for tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    None,
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCell {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Inline>>,
}

impl TableCell {
    pub fn from_inlines(children: Vec<Inline>) -> Self {
        Self {
            content: crate::plain::inlines_to_plain(&children),
            children: non_empty(children),
        }
    }
}

/// Block payloads, tagged by block type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BlockKind {
    Paragraph {
        #[serde(skip_serializing_if = "Option::is_none")]
        children: Option<Vec<Inline>>,
    },
    Heading {
        level: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        children: Option<Vec<Inline>>,
    },
    Code {
        raw_content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    List {
        subtype: ListKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        start: Option<u64>,
        items: Vec<ListItem>,
    },
    Blockquote {
        blocks: Vec<Block>,
    },
    Table {
        headers: Vec<TableCell>,
        rows: Vec<Vec<TableCell>>,
        align: Vec<Alignment>,
    },
    ThematicBreak,
    Html,
    FootnoteDef {
        footnote_defs: BTreeMap<String, String>,
    },
    Unknown {
        token_type: String,
    },
    Custom {
        custom_type: String,
        data: serde_json::Value,
    },
}

/// Block type identifier used for ids and registry lookups.
///
/// Builtin types form a closed set; plugin-defined types go through `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockType {
    Paragraph,
    Heading,
    Code,
    List,
    Blockquote,
    Table,
    ThematicBreak,
    Html,
    FootnoteDef,
    Unknown,
    Custom(String),
}

impl BlockType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Heading => "heading",
            Self::Code => "code",
            Self::List => "list",
            Self::Blockquote => "blockquote",
            Self::Table => "table",
            Self::ThematicBreak => "thematic-break",
            Self::Html => "html",
            Self::FootnoteDef => "footnote-def",
            Self::Unknown => "unknown",
            Self::Custom(name) => name,
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl From<&str> for BlockType {
    fn from(name: &str) -> Self {
        match name {
            "paragraph" => Self::Paragraph,
            "heading" => Self::Heading,
            "code" => Self::Code,
            "list" => Self::List,
            "blockquote" => Self::Blockquote,
            "table" => Self::Table,
            "thematic-break" => Self::ThematicBreak,
            "html" => Self::Html,
            "footnote-def" => Self::FootnoteDef,
            "unknown" => Self::Unknown,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block-level elements parsed from Markdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub id: String,
    pub position: usize,
    /// Plain-text rendition of the block
    pub content: String,
    pub is_complete: bool,
    #[serde(flatten)]
    pub kind: BlockKind,
}

impl Block {
    /// A block not yet placed; `assign_position` gives it an id.
    pub fn new(kind: BlockKind, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            position: 0,
            content: content.into(),
            is_complete: true,
            kind,
        }
    }

    pub fn paragraph(children: Vec<Inline>) -> Self {
        let content = crate::plain::inlines_to_plain(&children);
        Self::new(
            BlockKind::Paragraph {
                children: non_empty(children),
            },
            content,
        )
    }

    pub fn heading(level: u8, children: Vec<Inline>) -> Self {
        let content = crate::plain::inlines_to_plain(&children);
        Self::new(
            BlockKind::Heading {
                level,
                children: non_empty(children),
            },
            content,
        )
    }

    pub fn code(raw_content: impl Into<String>, language: Option<String>) -> Self {
        let raw_content = raw_content.into();
        Self::new(
            BlockKind::Code {
                raw_content: raw_content.clone(),
                language,
            },
            raw_content,
        )
    }

    pub fn custom(custom_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            BlockKind::Custom {
                custom_type: custom_type.into(),
                data: serde_json::Value::Null,
            },
            content,
        )
    }

    pub fn block_type(&self) -> BlockType {
        match &self.kind {
            BlockKind::Paragraph { .. } => BlockType::Paragraph,
            BlockKind::Heading { .. } => BlockType::Heading,
            BlockKind::Code { .. } => BlockType::Code,
            BlockKind::List { .. } => BlockType::List,
            BlockKind::Blockquote { .. } => BlockType::Blockquote,
            BlockKind::Table { .. } => BlockType::Table,
            BlockKind::ThematicBreak => BlockType::ThematicBreak,
            BlockKind::Html => BlockType::Html,
            BlockKind::FootnoteDef { .. } => BlockType::FootnoteDef,
            BlockKind::Unknown { .. } => BlockType::Unknown,
            BlockKind::Custom { custom_type, .. } => BlockType::Custom(custom_type.clone()),
        }
    }

    /// Inline children for block types that carry them
    pub fn inlines(&self) -> Option<&[Inline]> {
        match &self.kind {
            BlockKind::Paragraph { children } | BlockKind::Heading { children, .. } => {
                children.as_deref()
            }
            _ => None,
        }
    }

    /// Place the block at `position` under `parent` and derive ids for it and
    /// everything nested inside it.
    pub fn assign_position(&mut self, position: usize, parent: Option<&str>) {
        self.position = position;
        self.id = block_id(&self.block_type(), position, parent);
        let id = self.id.clone();
        match &mut self.kind {
            BlockKind::Blockquote { blocks } => {
                for (i, block) in blocks.iter_mut().enumerate() {
                    block.assign_position(i, Some(&id));
                }
            }
            BlockKind::List { items, .. } => {
                for (i, item) in items.iter_mut().enumerate() {
                    item.id = format!("{id}/item-{i}");
                    if let Some(blocks) = item.blocks.as_mut() {
                        for (j, block) in blocks.iter_mut().enumerate() {
                            block.assign_position(j, Some(&item.id));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Minimal shape check applied to blocks produced by extensions.
    pub fn is_well_formed(&self) -> bool {
        match &self.kind {
            BlockKind::Heading { level, .. } => (1..=6).contains(level),
            BlockKind::Code { language, .. } => language
                .as_deref()
                .is_none_or(crate::language::is_normalized),
            BlockKind::Custom { custom_type, .. } => {
                !custom_type.trim().is_empty() && !BlockType::from(custom_type.as_str()).is_builtin()
            }
            BlockKind::Blockquote { blocks } => blocks.iter().all(Block::is_well_formed),
            BlockKind::List { items, .. } => items
                .iter()
                .flat_map(|item| item.blocks.iter().flatten())
                .all(Block::is_well_formed),
            _ => true,
        }
    }

    /// Prune empty inline children arrays throughout the block.
    pub fn sanitize(mut self) -> Self {
        match &mut self.kind {
            BlockKind::Paragraph { children } | BlockKind::Heading { children, .. } => {
                *children = children.take().and_then(|c| non_empty(crate::inline::sanitize_inlines(c)));
            }
            BlockKind::Blockquote { blocks } => {
                *blocks = std::mem::take(blocks).into_iter().map(Block::sanitize).collect();
            }
            BlockKind::List { items, .. } => {
                for item in items.iter_mut() {
                    item.children = item
                        .children
                        .take()
                        .and_then(|c| non_empty(crate::inline::sanitize_inlines(c)));
                    item.blocks = item.blocks.take().and_then(|blocks| {
                        non_empty(blocks.into_iter().map(Block::sanitize).collect())
                    });
                }
            }
            BlockKind::Table { headers, rows, .. } => {
                for cell in headers.iter_mut().chain(rows.iter_mut().flatten()) {
                    cell.children = cell
                        .children
                        .take()
                        .and_then(|c| non_empty(crate::inline::sanitize_inlines(c)));
                }
            }
            _ => {}
        }
        self
    }
}

/// Deterministic id for a block of `block_type` at `position`.
pub fn block_id(block_type: &BlockType, position: usize, parent: Option<&str>) -> String {
    match parent {
        Some(parent) => format!("{parent}/{block_type}-{position}"),
        None => format!("{block_type}-{position}"),
    }
}

pub(crate) fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

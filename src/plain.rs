//! Plain-text renditions used for `content` fields.

use std::collections::BTreeMap;

use crate::block::{Block, BlockKind, Inline, InlineKind, ListItem, TableCell};

/// Flatten inline spans to text
pub fn inlines_to_plain(spans: &[Inline]) -> String {
    let mut out = String::new();
    for span in spans {
        span_to_plain(span, &mut out);
    }
    out
}

fn span_to_plain(span: &Inline, out: &mut String) {
    match &span.kind {
        InlineKind::HardBreak => out.push('\n'),
        InlineKind::Image { alt, .. } => out.push_str(alt),
        _ => match &span.children {
            Some(children) => {
                for child in children {
                    span_to_plain(child, out);
                }
            }
            None => out.push_str(&span.content),
        },
    }
}

/// Text of a list: one line per item, nested blocks indented beneath it
pub fn list_to_plain(items: &[ListItem]) -> String {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        lines.push(item.content.clone());
        for block in item.blocks.iter().flatten() {
            for line in block.content.lines() {
                lines.push(format!("  {line}"));
            }
        }
    }
    lines.join("\n")
}

/// Text of nested blocks, separated by blank lines
pub fn blocks_to_plain(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(|b| b.content.as_str())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Tab-separated header line followed by one line per row
pub fn table_to_plain(headers: &[TableCell], rows: &[Vec<TableCell>]) -> String {
    let mut out = row_to_plain(headers);
    for row in rows {
        out.push('\n');
        out.push_str(&row_to_plain(row));
    }
    out
}

fn row_to_plain(cells: &[TableCell]) -> String {
    cells
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\t")
}

pub fn footnotes_to_plain(defs: &BTreeMap<String, String>) -> String {
    defs.iter()
        .map(|(id, text)| format!("[^{id}]: {text}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Recompute `content` from the payload, for blocks built by hand or by plugins
pub fn refresh_content(block: &mut Block) {
    block.content = match &block.kind {
        BlockKind::Paragraph { children } | BlockKind::Heading { children, .. } => {
            inlines_to_plain(children.as_deref().unwrap_or_default())
        }
        BlockKind::Code { raw_content, .. } => raw_content.clone(),
        BlockKind::List { items, .. } => list_to_plain(items),
        BlockKind::Blockquote { blocks } => blocks_to_plain(blocks),
        BlockKind::Table { headers, rows, .. } => table_to_plain(headers, rows),
        BlockKind::FootnoteDef { footnote_defs } => footnotes_to_plain(footnote_defs),
        BlockKind::ThematicBreak => String::new(),
        BlockKind::Html | BlockKind::Unknown { .. } | BlockKind::Custom { .. } => {
            return;
        }
    };
}

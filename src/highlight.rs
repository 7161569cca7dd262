//! Syntax highlighting hand-off.
//!
//! The parser never highlights. It exposes what a highlighter needs and a
//! store the highlighter reports back into, keyed by block id.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use log::trace;
use serde::Serialize;
use tokio::sync::watch;

use crate::block::{Block, BlockKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HighlightRequest {
    pub block_id: String,
    pub language: Option<String>,
    pub raw_content: String,
    /// Incomplete blocks will change; highlighters may defer them
    pub is_complete: bool,
}

/// Every code block in `blocks`, including ones nested in quotes and lists
pub fn highlight_requests(blocks: &[Arc<Block>]) -> Vec<HighlightRequest> {
    let mut out = Vec::new();
    for block in blocks {
        collect(block, &mut out);
    }
    out
}

fn collect(block: &Block, out: &mut Vec<HighlightRequest>) {
    match &block.kind {
        BlockKind::Code {
            raw_content,
            language,
        } => out.push(HighlightRequest {
            block_id: block.id.clone(),
            language: language.clone(),
            raw_content: raw_content.clone(),
            is_complete: block.is_complete,
        }),
        BlockKind::Blockquote { blocks } => blocks.iter().for_each(|b| collect(b, out)),
        BlockKind::List { items, .. } => items
            .iter()
            .flat_map(|item| item.blocks.iter().flatten())
            .for_each(|b| collect(b, out)),
        _ => {}
    }
}

/// Highlight results attached asynchronously. Subscribers are woken with a
/// new version number whenever a result lands.
#[derive(Debug)]
pub struct HighlightStore {
    results: RwLock<HashMap<String, String>>,
    version: watch::Sender<u64>,
}

impl Default for HighlightStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HighlightStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            results: RwLock::new(HashMap::new()),
            version,
        }
    }

    pub fn attach(&self, block_id: impl Into<String>, highlighted: impl Into<String>) {
        let block_id = block_id.into();
        trace!("highlight attached for {block_id}");
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(block_id, highlighted.into());
        self.version.send_modify(|v| *v += 1);
    }

    pub fn get(&self, block_id: &str) -> Option<String> {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(block_id)
            .cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Forget everything, e.g. when the stream restarts and ids get reused
    pub fn clear(&self) {
        self.results
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.version.send_modify(|v| *v += 1);
    }
}

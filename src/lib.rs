//! Incremental markdown to block conversion for streamed text.
//!
//! [`BlockParser`] turns markdown into typed [`Block`]s and re-parses only the
//! unstable tail as text is appended. [`StreamingPipeline`] drives it from a
//! chunk channel, and [`PluginRuntime`] lets plugins contribute renderers and
//! parser extensions.

pub mod block;
pub mod boundary;
pub mod config;
pub mod error;
pub mod footnotes;
pub mod highlight;
pub mod inline;
pub mod language;
pub mod math;
pub mod parser;
pub mod plain;
pub mod plugin;
pub mod references;
pub mod repair;
pub mod stream;
pub mod token;

pub use block::{Block, BlockKind, BlockType, Inline, InlineKind, ListItem};
pub use config::Config;
pub use error::{Error, Result};
pub use parser::{BlockParser, ParseOutput, ParserOptions};
pub use plugin::{Plugin, PluginRuntime};
pub use stream::{StreamSnapshot, StreamStatus, StreamingPipeline, chunk_channel};

/// Parse markdown text into blocks in one go.
pub fn parse(markdown: &str) -> ParseOutput {
    BlockParser::new().parse(markdown)
}

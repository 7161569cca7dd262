//! Plugin runtime: renderer bindings, parser extensions and hooks contributed
//! by an ordered list of plugins, composed once into an immutable registry.
//!
//! - Plugins are sorted by `order` (ties keep declaration order).
//! - Renderer bindings for the same block type are settled by the later
//!   plugin's [`OverrideStrategy`], after the [`SecurityPolicy`] agrees.
//! - Block and inline extensions are tried before builtin parsing.
//! - Every failure in plugin code is contained, logged and counted.

mod dispatch;
mod registry;
mod security;
mod stats;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::block::{Block, BlockType};
use crate::error::ExtensionResult;

pub use dispatch::{BlockExtension, InlineExtension};
pub use registry::{Binding, ConflictRecord, ConflictStrategy, LifecycleState, PluginRuntime};
pub use security::{DefaultSecurityPolicy, PermissiveSecurityPolicy, SecurityPolicy};
pub use stats::{CounterSnapshot, PluginCounters, StatsSnapshot};

/// What happens when a plugin binds a block type that is already bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideStrategy {
    #[default]
    Replace,
    Preserve,
    Error,
}

/// Everything a renderer gets to see
#[derive(Debug, Clone, Copy)]
pub struct RenderProps<'a> {
    pub block: &'a Block,
    pub is_complete: bool,
}

/// Renders a block. The output format is up to the embedding application.
pub trait BlockRenderer: Send + Sync {
    fn render(&self, props: &RenderProps<'_>) -> String;
}

impl<F> BlockRenderer for F
where
    F: Fn(&RenderProps<'_>) -> String + Send + Sync,
{
    fn render(&self, props: &RenderProps<'_>) -> String {
        self(props)
    }
}

/// Maps a block to the type whose renderer should draw it
pub type BlockResolver = Arc<dyn Fn(&Block) -> Option<BlockType> + Send + Sync>;

/// Returned from `on_init`; runs once at teardown
pub type Cleanup = Box<dyn FnOnce() + Send>;

pub type InitHook = Arc<dyn Fn() -> ExtensionResult<Option<Cleanup>> + Send + Sync>;
pub type DestroyHook = Arc<dyn Fn() -> ExtensionResult<()> + Send + Sync>;
/// May return a replacement block to render instead
pub type BeforeRenderHook = Arc<dyn Fn(&Block) -> ExtensionResult<Option<Block>> + Send + Sync>;
/// May return replacement output
pub type AfterRenderHook =
    Arc<dyn Fn(&Block, &str) -> ExtensionResult<Option<String>> + Send + Sync>;

/// A plugin descriptor.
///
/// ```ignore
/// let chart = Plugin::new("charts")
///     .order(10)
///     .component("chart", |props: &RenderProps<'_>| format!("<chart>{}</chart>", props.block.content));
/// ```
#[derive(Clone, Default)]
pub struct Plugin {
    pub name: String,
    pub order: i32,
    pub override_strategy: OverrideStrategy,
    /// Builtin plugins ship with the application and pass the default security policy
    pub builtin: bool,
    pub components: Vec<(BlockType, Arc<dyn BlockRenderer>)>,
    pub block_resolver: Option<BlockResolver>,
    pub block_extensions: Vec<Arc<dyn BlockExtension>>,
    pub inline_extensions: Vec<Arc<dyn InlineExtension>>,
    pub on_init: Option<InitHook>,
    pub on_destroy: Option<DestroyHook>,
    pub before_render: Option<BeforeRenderHook>,
    pub after_render: Option<AfterRenderHook>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn override_strategy(mut self, strategy: OverrideStrategy) -> Self {
        self.override_strategy = strategy;
        self
    }

    pub fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }

    pub fn component(
        mut self,
        block_type: impl Into<BlockType>,
        renderer: impl BlockRenderer + 'static,
    ) -> Self {
        self.components.push((block_type.into(), Arc::new(renderer)));
        self
    }

    pub fn block_resolver(
        mut self,
        resolver: impl Fn(&Block) -> Option<BlockType> + Send + Sync + 'static,
    ) -> Self {
        self.block_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn block_extension(mut self, extension: impl BlockExtension + 'static) -> Self {
        self.block_extensions.push(Arc::new(extension));
        self
    }

    pub fn inline_extension(mut self, extension: impl InlineExtension + 'static) -> Self {
        self.inline_extensions.push(Arc::new(extension));
        self
    }

    pub fn on_init(
        mut self,
        hook: impl Fn() -> ExtensionResult<Option<Cleanup>> + Send + Sync + 'static,
    ) -> Self {
        self.on_init = Some(Arc::new(hook));
        self
    }

    pub fn on_destroy(mut self, hook: impl Fn() -> ExtensionResult<()> + Send + Sync + 'static) -> Self {
        self.on_destroy = Some(Arc::new(hook));
        self
    }

    pub fn before_render(
        mut self,
        hook: impl Fn(&Block) -> ExtensionResult<Option<Block>> + Send + Sync + 'static,
    ) -> Self {
        self.before_render = Some(Arc::new(hook));
        self
    }

    pub fn after_render(
        mut self,
        hook: impl Fn(&Block, &str) -> ExtensionResult<Option<String>> + Send + Sync + 'static,
    ) -> Self {
        self.after_render = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("override_strategy", &self.override_strategy)
            .field("builtin", &self.builtin)
            .field(
                "components",
                &self.components.iter().map(|(t, _)| t.as_str()).collect::<Vec<_>>(),
            )
            .field("block_extensions", &self.block_extensions.len())
            .field("inline_extensions", &self.inline_extensions.len())
            .finish_non_exhaustive()
    }
}

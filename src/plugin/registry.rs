use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use serde::Serialize;

use crate::block::{Block, BlockType};
use crate::error::{ExtensionError, RegistryError, RegistryResult};

use super::dispatch::{Registered, guarded};
use super::stats::{Counter, Stats};
use super::{
    BlockExtension, BlockRenderer, BlockResolver, Cleanup, DefaultSecurityPolicy,
    InlineExtension, OverrideStrategy, Plugin, RenderProps, SecurityPolicy, StatsSnapshot,
};

/// How a binding conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    Replace,
    Preserve,
    Error,
    /// The security policy refused the binding outright
    SecurityRejected,
}

impl From<OverrideStrategy> for ConflictStrategy {
    fn from(strategy: OverrideStrategy) -> Self {
        match strategy {
            OverrideStrategy::Replace => Self::Replace,
            OverrideStrategy::Preserve => Self::Preserve,
            OverrideStrategy::Error => Self::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    /// Owner of the binding at the time, if any
    pub existing_plugin_name: Option<String>,
    pub plugin_name: String,
    pub block_type: String,
    pub strategy: ConflictStrategy,
}

/// A renderer bound to a block type
#[derive(Clone)]
pub struct Binding {
    pub plugin: String,
    plugin_index: usize,
    pub renderer: Arc<dyn BlockRenderer>,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding").field("plugin", &self.plugin).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initialized,
    Destroyed,
}

struct Lifecycle {
    state: LifecycleState,
    cleanups: Vec<(usize, Cleanup)>,
}

/// The composed registry. Immutable after construction apart from lifecycle
/// state and counters, so it can be shared behind an `Arc`.
pub struct PluginRuntime {
    plugins: Vec<Plugin>,
    bindings: HashMap<BlockType, Binding>,
    resolvers: Vec<(usize, BlockResolver)>,
    pub(super) block_extensions: Vec<Registered<dyn BlockExtension>>,
    pub(super) inline_extensions: Vec<Registered<dyn InlineExtension>>,
    conflicts: Vec<ConflictRecord>,
    pub(super) stats: Stats,
    lifecycle: Mutex<Lifecycle>,
}

impl PluginRuntime {
    /// Compose `plugins` under the [`DefaultSecurityPolicy`].
    pub fn new(plugins: Vec<Plugin>) -> RegistryResult<Self> {
        Self::with_policy(plugins, &DefaultSecurityPolicy)
    }

    pub fn with_policy(mut plugins: Vec<Plugin>, policy: &dyn SecurityPolicy) -> RegistryResult<Self> {
        // Stable: equal orders keep declaration order.
        plugins.sort_by_key(|p| p.order);

        let mut bindings: HashMap<BlockType, Binding> = HashMap::new();
        let mut conflicts = Vec::new();

        for (index, plugin) in plugins.iter().enumerate() {
            for (block_type, renderer) in &plugin.components {
                let existing = bindings.get(block_type).map(|b| b.plugin.clone());

                if !policy.may_bind(plugin, block_type) {
                    warn!(
                        "security policy rejected plugin '{}' binding '{}'",
                        plugin.name, block_type
                    );
                    conflicts.push(ConflictRecord {
                        existing_plugin_name: existing,
                        plugin_name: plugin.name.clone(),
                        block_type: block_type.to_string(),
                        strategy: ConflictStrategy::SecurityRejected,
                    });
                    continue;
                }

                let binding = Binding {
                    plugin: plugin.name.clone(),
                    plugin_index: index,
                    renderer: Arc::clone(renderer),
                };

                let Some(existing) = existing else {
                    bindings.insert(block_type.clone(), binding);
                    continue;
                };

                let strategy = plugin.override_strategy;
                conflicts.push(ConflictRecord {
                    existing_plugin_name: Some(existing.clone()),
                    plugin_name: plugin.name.clone(),
                    block_type: block_type.to_string(),
                    strategy: strategy.into(),
                });
                match strategy {
                    OverrideStrategy::Replace => {
                        debug!("'{}' replaces '{existing}' for '{block_type}'", plugin.name);
                        bindings.insert(block_type.clone(), binding);
                    }
                    OverrideStrategy::Preserve => {
                        debug!("'{}' keeps '{existing}' for '{block_type}'", plugin.name);
                    }
                    OverrideStrategy::Error => {
                        return Err(RegistryError::conflict(
                            block_type.as_str(),
                            existing,
                            plugin.name.as_str(),
                        ));
                    }
                }
            }
        }

        let resolvers = plugins
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.block_resolver.clone().map(|r| (i, r)))
            .collect();

        let mut block_extensions: Vec<_> = plugins
            .iter()
            .enumerate()
            .flat_map(|(i, p)| {
                p.block_extensions.iter().map(move |ext| Registered {
                    plugin: i,
                    extension: Arc::clone(ext),
                })
            })
            .collect();
        block_extensions.sort_by_key(|r| Reverse(r.extension.priority()));

        let mut inline_extensions: Vec<_> = plugins
            .iter()
            .enumerate()
            .flat_map(|(i, p)| {
                p.inline_extensions.iter().map(move |ext| Registered {
                    plugin: i,
                    extension: Arc::clone(ext),
                })
            })
            .collect();
        inline_extensions.sort_by_key(|r| Reverse(r.extension.priority()));

        info!(
            "plugin runtime: {} plugins, {} bindings, {} conflicts",
            plugins.len(),
            bindings.len(),
            conflicts.len()
        );

        let stats = Stats::new(plugins.iter().map(|p| p.name.clone()));
        Ok(Self {
            plugins,
            bindings,
            resolvers,
            block_extensions,
            inline_extensions,
            conflicts,
            stats,
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::Created,
                cleanups: Vec::new(),
            }),
        })
    }

    /// Plugin names in effective order
    pub fn plugin_names(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|p| p.name.as_str())
    }

    pub fn conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(&self.conflicts)
    }

    pub fn binding(&self, block_type: &BlockType) -> Option<&Binding> {
        self.bindings.get(block_type)
    }

    /// The binding that would render `block`: resolvers first, in plugin
    /// order, then the block's own type.
    pub fn resolve(&self, block: &Block) -> Option<&Binding> {
        for (index, resolver) in &self.resolvers {
            match guarded(|| Ok(resolver(block))) {
                Ok(Some(block_type)) => {
                    if let Some(binding) = self.bindings.get(&block_type) {
                        return Some(binding);
                    }
                }
                Ok(None) => {}
                Err(err) => self.record_error(*index, "block resolver", &err),
            }
        }
        self.bindings.get(&block.block_type())
    }

    /// Render `block` through the hooks and the resolved renderer. `None`
    /// when nothing is bound, so the host can fall back to its own rendering.
    pub fn render(&self, block: &Block, is_complete: bool) -> Option<String> {
        let block = self.run_before_render(block);
        let binding = self.resolve(&block)?;

        let props = RenderProps {
            block: &block,
            is_complete,
        };
        let output = match guarded(|| Ok(binding.renderer.render(&props))) {
            Ok(output) => output,
            Err(err) => {
                self.record_error(binding.plugin_index, "renderer", &err);
                return None;
            }
        };
        Some(self.run_after_render(&block, output))
    }

    fn run_before_render<'b>(&self, block: &'b Block) -> Cow<'b, Block> {
        let mut current = Cow::Borrowed(block);
        for (index, plugin) in self.plugins.iter().enumerate() {
            let Some(hook) = &plugin.before_render else {
                continue;
            };
            self.stats.record(index, Counter::RenderHook);
            match guarded(|| hook(&current)) {
                Ok(Some(replacement)) => current = Cow::Owned(replacement),
                Ok(None) => {}
                Err(err) => self.record_error(index, "before_render", &err),
            }
        }
        current
    }

    fn run_after_render(&self, block: &Block, mut output: String) -> String {
        for (index, plugin) in self.plugins.iter().enumerate() {
            let Some(hook) = &plugin.after_render else {
                continue;
            };
            self.stats.record(index, Counter::RenderHook);
            match guarded(|| hook(block, &output)) {
                Ok(Some(replacement)) => output = replacement,
                Ok(None) => {}
                Err(err) => self.record_error(index, "after_render", &err),
            }
        }
        output
    }

    pub(super) fn record_error(&self, plugin: usize, what: &str, err: &ExtensionError) {
        let name = self.plugins.get(plugin).map_or("?", |p| p.name.as_str());
        warn!("plugin '{name}': {what} failed: {err}");
        self.stats.record(plugin, Counter::Error);
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lock_lifecycle().state
    }

    /// Run `on_init` hooks in plugin order. Only the first call does anything.
    pub fn init(&self) {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.state != LifecycleState::Created {
            return;
        }
        for (index, plugin) in self.plugins.iter().enumerate() {
            let Some(hook) = &plugin.on_init else {
                continue;
            };
            self.stats.record(index, Counter::Lifecycle);
            match guarded(|| hook()) {
                Ok(Some(cleanup)) => lifecycle.cleanups.push((index, cleanup)),
                Ok(None) => {}
                Err(err) => self.record_error(index, "on_init", &err),
            }
        }
        lifecycle.state = LifecycleState::Initialized;
        debug!("plugins initialized");
    }

    /// Run `on_destroy` hooks in reverse order, then the cleanups returned
    /// from `on_init`. Idempotent; also runs on drop.
    pub fn destroy(&self) {
        let (was_initialized, cleanups) = {
            let mut lifecycle = self.lock_lifecycle();
            if lifecycle.state == LifecycleState::Destroyed {
                return;
            }
            let was_initialized = lifecycle.state == LifecycleState::Initialized;
            lifecycle.state = LifecycleState::Destroyed;
            (was_initialized, std::mem::take(&mut lifecycle.cleanups))
        };

        if was_initialized {
            for (index, plugin) in self.plugins.iter().enumerate().rev() {
                let Some(hook) = &plugin.on_destroy else {
                    continue;
                };
                self.stats.record(index, Counter::Lifecycle);
                if let Err(err) = guarded(|| hook()) {
                    self.record_error(index, "on_destroy", &err);
                }
            }
        }

        for (index, cleanup) in cleanups.into_iter().rev() {
            let result = guarded(|| {
                cleanup();
                Ok(())
            });
            if let Err(err) = result {
                self.record_error(index, "cleanup", &err);
            }
        }
        debug!("plugins destroyed");
    }
}

impl Default for PluginRuntime {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            bindings: HashMap::new(),
            resolvers: Vec::new(),
            block_extensions: Vec::new(),
            inline_extensions: Vec::new(),
            conflicts: Vec::new(),
            stats: Stats::default(),
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::Created,
                cleanups: Vec::new(),
            }),
        }
    }
}

impl Drop for PluginRuntime {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("plugins", &self.plugins)
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("conflicts", &self.conflicts)
            .finish_non_exhaustive()
    }
}

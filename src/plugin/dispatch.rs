//! Block and inline extension dispatch.
//!
//! For each token the candidates run in priority order: handler, then
//! validation, then the extension's fallback if either failed. The first
//! validated result wins. Errors and panics in any of those calls are
//! contained here; the parser only ever sees `Some(result)` or `None`.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use log::debug;

use crate::block::{Block, Inline, InlineKind};
use crate::error::{ExtensionError, ExtensionResult};
use crate::token::Token;

use super::PluginRuntime;
use super::stats::Counter;

/// Turns tokens into blocks ahead of the builtin parser.
pub trait BlockExtension: Send + Sync {
    fn name(&self) -> &str;

    /// Only tokens with this name (`"code_block"`, `"paragraph"`, ...) are offered
    fn token_type(&self) -> Option<&str> {
        None
    }

    /// Higher runs first
    fn priority(&self) -> i32 {
        0
    }

    fn matches(&self, _token: &Token) -> bool {
        true
    }

    /// `Ok(None)` passes the token on to the next extension.
    fn parse(&self, token: &Token) -> ExtensionResult<Option<Block>>;

    fn validate(&self, block: &Block) -> ExtensionResult<bool> {
        Ok(block.is_well_formed())
    }

    /// Second chance after the handler failed or produced an invalid block.
    fn fallback(&self, _token: &Token, _error: &ExtensionError) -> ExtensionResult<Option<Block>> {
        Ok(None)
    }
}

/// Turns inline tokens into spans ahead of the builtin inline parser.
pub trait InlineExtension: Send + Sync {
    fn name(&self) -> &str;

    fn token_type(&self) -> Option<&str> {
        None
    }

    fn priority(&self) -> i32 {
        0
    }

    fn matches(&self, _token: &Token) -> bool {
        true
    }

    fn parse(&self, token: &Token) -> ExtensionResult<Option<Inline>>;

    fn validate(&self, inline: &Inline) -> ExtensionResult<bool> {
        Ok(inline_is_well_formed(inline))
    }

    fn fallback(&self, _token: &Token, _error: &ExtensionError) -> ExtensionResult<Option<Inline>> {
        Ok(None)
    }
}

fn inline_is_well_formed(inline: &Inline) -> bool {
    let own = match &inline.kind {
        InlineKind::Math { .. } => !inline.content.is_empty(),
        InlineKind::FootnoteRef { id } => !id.is_empty(),
        InlineKind::Link { href, .. } => !href.is_empty(),
        InlineKind::Image { src, .. } => !src.is_empty(),
        _ => true,
    };
    own && inline
        .children
        .iter()
        .flatten()
        .all(inline_is_well_formed)
}

/// An extension together with the index of the plugin that declared it
pub(crate) struct Registered<E: ?Sized> {
    pub(crate) plugin: usize,
    pub(crate) extension: Arc<E>,
}

/// Common surface of both extension kinds, so dispatch is written once.
trait Candidate<T> {
    fn name(&self) -> &str;
    fn accepts(&self, token: &Token) -> bool;
    fn run(&self, token: &Token) -> ExtensionResult<Option<T>>;
    fn check(&self, value: &T) -> ExtensionResult<bool>;
    fn recover(&self, token: &Token, error: &ExtensionError) -> ExtensionResult<Option<T>>;
}

impl Candidate<Block> for dyn BlockExtension {
    fn name(&self) -> &str {
        BlockExtension::name(self)
    }

    fn accepts(&self, token: &Token) -> bool {
        self.token_type().is_none_or(|t| t == token.name()) && self.matches(token)
    }

    fn run(&self, token: &Token) -> ExtensionResult<Option<Block>> {
        self.parse(token)
    }

    fn check(&self, value: &Block) -> ExtensionResult<bool> {
        self.validate(value)
    }

    fn recover(&self, token: &Token, error: &ExtensionError) -> ExtensionResult<Option<Block>> {
        self.fallback(token, error)
    }
}

impl Candidate<Inline> for dyn InlineExtension {
    fn name(&self) -> &str {
        InlineExtension::name(self)
    }

    fn accepts(&self, token: &Token) -> bool {
        self.token_type().is_none_or(|t| t == token.name()) && self.matches(token)
    }

    fn run(&self, token: &Token) -> ExtensionResult<Option<Inline>> {
        self.parse(token)
    }

    fn check(&self, value: &Inline) -> ExtensionResult<bool> {
        self.validate(value)
    }

    fn recover(&self, token: &Token, error: &ExtensionError) -> ExtensionResult<Option<Inline>> {
        self.fallback(token, error)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run plugin code, turning a panic into an [`ExtensionError::Panicked`].
pub(crate) fn guarded<T>(f: impl FnOnce() -> ExtensionResult<T>) -> ExtensionResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(ExtensionError::Panicked(panic_message(payload)))
    })
}

impl PluginRuntime {
    /// Offer `token` to the block extensions. `None` means builtin parsing applies.
    pub fn dispatch_block(&self, token: &Token) -> Option<Block> {
        self.dispatch(&self.block_extensions, token)
    }

    /// Offer `token` to the inline extensions. `None` means builtin parsing applies.
    pub fn dispatch_inline(&self, token: &Token) -> Option<Inline> {
        self.dispatch(&self.inline_extensions, token)
    }

    fn dispatch<E, T>(&self, extensions: &[Registered<E>], token: &Token) -> Option<T>
    where
        E: Candidate<T> + ?Sized,
    {
        for entry in extensions {
            let ext = entry.extension.as_ref();
            if !ext.accepts(token) {
                continue;
            }
            if let Some(value) = self.attempt(entry.plugin, ext, token) {
                return Some(value);
            }
        }
        None
    }

    fn attempt<E, T>(&self, plugin: usize, ext: &E, token: &Token) -> Option<T>
    where
        E: Candidate<T> + ?Sized,
    {
        self.stats.record(plugin, Counter::ExtensionCall);

        let failure = match guarded(|| ext.run(token)) {
            Ok(None) => return None,
            Ok(Some(value)) => match self.validated(plugin, ext, value) {
                Ok(value) => return Some(value),
                Err(err) => err,
            },
            Err(err) => {
                self.record_error(plugin, ext.name(), &err);
                err
            }
        };

        self.stats.record(plugin, Counter::ExtensionFallback);
        match guarded(|| ext.recover(token, &failure)) {
            Ok(Some(value)) => self.validated(plugin, ext, value).ok(),
            Ok(None) => None,
            Err(err) => {
                self.record_error(plugin, ext.name(), &err);
                None
            }
        }
    }

    fn validated<E, T>(&self, plugin: usize, ext: &E, value: T) -> Result<T, ExtensionError>
    where
        E: Candidate<T> + ?Sized,
    {
        match guarded(|| ext.check(&value)) {
            Ok(true) => Ok(value),
            Ok(false) => {
                debug!("extension '{}' produced a value that failed validation", ext.name());
                Err(ExtensionError::invalid(format!(
                    "'{}' output failed validation",
                    ext.name()
                )))
            }
            Err(err) => {
                self.record_error(plugin, ext.name(), &err);
                Err(err)
            }
        }
    }
}

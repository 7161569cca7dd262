//! Error types for the blockstream library
//!
//! Parsing itself never fails at its public surface; these types cover the
//! places where a caller genuinely has to react: registry construction,
//! plugin code, configuration loading and the chunk source.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building the plugin registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A plugin with `OverrideStrategy::Error` tried to bind an already bound type
    #[error(
        "plugin '{plugin}' cannot bind block type '{block_type}': already bound by '{existing}'"
    )]
    Conflict {
        block_type: String,
        existing: String,
        plugin: String,
    },
}

impl RegistryError {
    /// Create a binding conflict error
    pub fn conflict(
        block_type: impl Into<String>,
        existing: impl Into<String>,
        plugin: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            block_type: block_type.into(),
            existing: existing.into(),
            plugin: plugin.into(),
        }
    }
}

/// Result type for registry construction
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Error returned by plugin handlers, validators and fallbacks.
///
/// These never escape extension dispatch; they are logged and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    /// The handler could not process the token
    #[error("handler failed: {0}")]
    Handler(String),

    /// The produced value was rejected by validation
    #[error("validation failed: {0}")]
    Invalid(String),

    /// Plugin code panicked
    #[error("plugin panicked: {0}")]
    Panicked(String),
}

impl ExtensionError {
    /// Create a handler error
    pub fn handler(reason: impl Into<String>) -> Self {
        Self::Handler(reason.into())
    }

    /// Create a validation error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }
}

/// Result type for plugin extension code
pub type ExtensionResult<T> = std::result::Result<T, ExtensionError>;

/// Errors while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors surfaced by the streaming pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The chunk source signalled a failure
    #[error("stream failed: {0}")]
    Source(String),

    /// The pipeline stopped receiving, e.g. after `reset`
    #[error("stream closed")]
    Closed,

    /// The pipeline was started outside a tokio runtime
    #[error("no tokio runtime available to drive the stream")]
    NoRuntime,
}

/// Umbrella error for callers that do not care which layer failed
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Result type for blockstream operations
pub type Result<T> = std::result::Result<T, Error>;

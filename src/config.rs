use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

static DEFAULT_CONFIG: &str = include_str!("default_config.toml");

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub parser: ParserConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub batch_window_ms: u64,
    pub max_batch_bytes: usize,
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: 32,
            max_batch_bytes: 16 * 1024,
            channel_capacity: 64,
        }
    }
}

impl StreamConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParserConfig {
    /// Scan text for `$...$` / `$$...$$` math
    pub math: bool,
    /// Extract `[^id]: ...` definitions and rewrite `[^id]` references
    pub footnotes: bool,
    /// Extra code-fence language aliases, applied before the builtin table
    pub language_aliases: HashMap<String, String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            math: true,
            footnotes: true,
            language_aliases: HashMap::new(),
        }
    }
}

impl Config {
    /// The defaults shipped in `default_config.toml`.
    pub fn compiled_default() -> Self {
        // Validated by build.rs, so this only falls back if the two drift apart.
        toml::from_str(DEFAULT_CONFIG).unwrap_or_default()
    }

    /// Parse config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load config from a TOML file, failing on I/O or syntax errors.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load config from a TOML file, or return defaults if not found or invalid.
    pub fn load(path: &Path) -> Self {
        match Self::from_path(path) {
            Ok(config) => {
                log::debug!("Using config from: {}", path.display());
                config
            }
            Err(ConfigError::Io { .. }) => {
                log::debug!("Using default config");
                Self::compiled_default()
            }
            Err(e) => {
                log::warn!("Ignoring {}: {}", path.display(), e);
                Self::compiled_default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compiled_default_matches_default_impl() {
        assert_eq!(Config::compiled_default(), Config::default());
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
[stream]
batch_window_ms = 50

[parser.language_aliases]
tsx = "typescript"
"#,
        )
        .unwrap();
        assert_eq!(config.stream.batch_window(), Duration::from_millis(50));
        assert_eq!(config.stream.channel_capacity, 64);
        assert!(config.parser.math);
        assert_eq!(
            config.parser.language_aliases.get("tsx").map(String::as_str),
            Some("typescript")
        );
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(matches!(
            Config::from_toml("[stream\nbatch_window_ms = 1"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = Config::load(Path::new("/nonexistent/blockstream.toml"));
        assert_eq!(config, Config::default());
    }
}

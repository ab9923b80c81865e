//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Default `tracing` filter directive.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Default number of tokenized strings kept by the resolver.
pub const DEFAULT_TOKEN_CACHE_CAPACITY: usize = 1000;

/// Root configuration structure.
///
/// All sections are optional so partial files can be layered with
/// [`merge`](Self::merge).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelinerConfig {
    pub console: Option<ConsoleConfig>,
    pub logging: Option<LoggingConfig>,
    pub engine: Option<EngineConfig>,
}

impl PipelinerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: PipelinerConfig) {
        if other.console.is_some() {
            self.console = other.console;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
        if other.engine.is_some() {
            self.engine = other.engine;
        }
    }

    /// Console section, or defaults.
    pub fn console(&self) -> ConsoleConfig {
        self.console.clone().unwrap_or_default()
    }

    /// Logging section, or defaults.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Engine section, or defaults.
    pub fn engine(&self) -> EngineConfig {
        self.engine.clone().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// `[console]`: progress output formatting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Prefix each line with a timestamp.
    pub timestamps: bool,
    /// Only print command lines and errors.
    pub minimal: bool,
}

/// `[logging]`: diagnostics written through `tracing`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `pipeliner_engine=debug`.
    pub level: String,
    /// Directory for daily JSON log files. Unset disables file logging.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

/// `[engine]`: execution defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub token_cache_capacity: usize,
    /// Exported to commands as `PIPELINER_TMP`.
    pub tmp_dir: Option<PathBuf>,
    /// Extra environment variables for every run.
    pub env: BTreeMap<String, String>,
    /// Extra pipeline variables for every run.
    pub variables: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            token_cache_capacity: DEFAULT_TOKEN_CACHE_CAPACITY,
            tmp_dir: None,
            env: BTreeMap::new(),
            variables: BTreeMap::new(),
        }
    }
}

//! Locating and layering `pipeliner` config files.
//!
//! Two layers are read, user then project. A layer that is absent is
//! skipped; one that fails to read or parse is reported and skipped, so a
//! broken file never stops a run. Command line flags are applied on top by
//! the binary.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::{ConfigError, PipelinerConfig, Result};

/// Overrides the user layer directory.
const CONFIG_DIR_ENV: &str = "PIPELINER_CONFIG_DIR";

// ─────────────────────────────────────────────────────────────────────────────
// Layers
// ─────────────────────────────────────────────────────────────────────────────

/// A config layer, listed lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// `config.toml` in the user config directory.
    User,
    /// `pipeliner.toml` in the project directory.
    Project,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::User, Layer::Project];

    pub fn file_name(self) -> &'static str {
        match self {
            Layer::User => "config.toml",
            Layer::Project => "pipeliner.toml",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::User => write!(f, "user"),
            Layer::Project => write!(f, "project"),
        }
    }
}

/// One layer that discovery looked at.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: Layer,
    pub path: PathBuf,
    pub loaded: bool,
}

/// Merged configuration plus a record of how it was assembled.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: PipelinerConfig,
    pub sources: Vec<ConfigSource>,
    /// One entry per layer that exists but was skipped.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Finds the layer files and merges them.
///
/// Without overrides the user layer comes from [`user_config_dir`] and the
/// project layer from the current directory.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    user_dir: Option<PathBuf>,
    project_dir: Option<PathBuf>,
}

impl Discovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// File for `layer`, or `None` when no user directory can be determined.
    pub fn path(&self, layer: Layer) -> Option<PathBuf> {
        let dir = match layer {
            Layer::User => self.user_dir.clone().or_else(user_config_dir)?,
            Layer::Project => self.project_dir.clone().unwrap_or_default(),
        };
        Some(dir.join(layer.file_name()))
    }

    pub fn load(&self) -> LoadedConfig {
        let mut loaded = LoadedConfig {
            config: PipelinerConfig::new(),
            sources: Vec::new(),
            warnings: Vec::new(),
        };

        for layer in Layer::ALL {
            let Some(path) = self.path(layer) else {
                continue;
            };
            let mut is_loaded = false;
            if path.is_file() {
                match read_config(&path) {
                    Ok(config) => {
                        loaded.config.merge(config);
                        is_loaded = true;
                    }
                    Err(e) => loaded
                        .warnings
                        .push(format!("skipping {} config {}: {}", layer, path.display(), e)),
                }
            }
            loaded.sources.push(ConfigSource {
                layer,
                path,
                loaded: is_loaded,
            });
        }

        loaded
    }
}

/// Parse a single config file.
pub fn read_config(path: &Path) -> Result<PipelinerConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    PipelinerConfig::from_toml(&contents)
}

/// `$PIPELINER_CONFIG_DIR` when set and non-empty, else `<platform config dir>/pipeliner`.
pub fn user_config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join("pipeliner")),
    }
}

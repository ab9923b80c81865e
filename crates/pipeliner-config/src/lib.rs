//! Configuration for the pipeliner command line.
//!
//! TOML files are layered, later layers replacing earlier ones section by
//! section:
//!
//! 1. `$PIPELINER_CONFIG_DIR/config.toml`, or the platform config directory
//!    (`~/.config/pipeliner/config.toml` on Linux)
//! 2. `./pipeliner.toml`
//! 3. command line flags (applied by the binary)
//!
//! ```toml
//! [console]
//! timestamps = true
//! minimal = false
//!
//! [logging]
//! level = "info"
//! directory = "/var/log/pipeliner"
//!
//! [engine]
//! token_cache_capacity = 1000
//! tmp_dir = "/tmp/pipeliner"
//!
//! [engine.env]
//! CI = "true"
//!
//! [engine.variables]
//! release = "stable"
//! ```

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{ConfigSource, Discovery, Layer, LoadedConfig, read_config, user_config_dir};
pub use error::{ConfigError, Result};
pub use types::*;

//! `--with-file` support: `key=value` properties files.
//!
//! One entry per line, separated by the first `=` or `:`. Blank lines and
//! lines starting with `#` or `!` are ignored. Keys and values are trimmed.

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use pipeliner_engine::Variables;

/// Read a properties file into a variable map.
pub fn read(path: &Path) -> Result<Variables> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read properties file [{}]", path.display()))?;
    parse(&contents).with_context(|| format!("invalid properties file [{}]", path.display()))
}

pub fn parse(contents: &str) -> Result<Variables> {
    let mut variables = Variables::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some(split) = line.find(['=', ':']) else {
            bail!("line {}: expected key=value", index + 1);
        };
        let key = line[..split].trim();
        if key.is_empty() {
            bail!("line {}: empty key", index + 1);
        }
        variables.insert(key.to_string(), line[split + 1..].trim().to_string());
    }
    Ok(variables)
}

//! File-based variable exchange with spawned commands.
//!
//! Each command gets a private pair of files whose paths are exported as
//! `PIPELINER_IPC_IN` and `PIPELINER_IPC_OUT`. Both use the same line format:
//!
//! ```text
//! base64(key) SPACE base64(value)
//! ```
//!
//! Blank lines and lines starting with `#` are ignored when reading. A line
//! with a single token is a key with an empty value.

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::{Mutex, const_mutex};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::resolver::Variables;
use crate::variable::is_scoped_identifier;

/// Environment variable holding the engine-to-command file path.
pub const IPC_IN: &str = "PIPELINER_IPC_IN";

/// Environment variable holding the command-to-engine file path.
pub const IPC_OUT: &str = "PIPELINER_IPC_OUT";

const FILE_PREFIX: &str = "pipeliner-ipc-";

/// Paths of live IPC files, swept at process exit.
static LIVE_FILES: Mutex<Vec<PathBuf>> = const_mutex(Vec::new());

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Encode a variable map in the IPC line format.
pub fn encode(variables: &Variables) -> String {
    let mut out = String::new();
    for (key, value) in variables {
        out.push_str(&STANDARD.encode(key));
        out.push(' ');
        out.push_str(&STANDARD.encode(value));
        out.push('\n');
    }
    out
}

/// Decode IPC file contents into a variable map.
pub fn decode(contents: &str) -> Result<Variables> {
    let mut variables = Variables::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (key, value) = match tokens.as_slice() {
            [key] => (decode_token(key, index)?, String::new()),
            [key, value] => (decode_token(key, index)?, decode_token(value, index)?),
            _ => {
                return Err(EngineError::Ipc(format!(
                    "invalid IPC line [{}]: expected 1 or 2 tokens, found {}",
                    index + 1,
                    tokens.len()
                )));
            }
        };

        if !is_scoped_identifier(&key) {
            return Err(EngineError::Ipc(format!(
                "invalid IPC variable name [{}] on line [{}]",
                key,
                index + 1
            )));
        }
        variables.insert(key, value);
    }
    Ok(variables)
}

fn decode_token(token: &str, index: usize) -> Result<String> {
    let bytes = STANDARD.decode(token).map_err(|e| {
        EngineError::Ipc(format!("invalid base64 on IPC line [{}]: {}", index + 1, e))
    })?;
    String::from_utf8(bytes).map_err(|_| {
        EngineError::Ipc(format!("invalid UTF-8 on IPC line [{}]", index + 1))
    })
}

/// Write a variable map to `path`.
pub fn write(path: &Path, variables: &Variables) -> Result<()> {
    std::fs::write(path, encode(variables)).map_err(|e| {
        EngineError::Ipc(format!("failed to write IPC file [{}]: {}", path.display(), e))
    })
}

/// Read a variable map from `path`.
pub fn read(path: &Path) -> Result<Variables> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        EngineError::Ipc(format!("failed to read IPC file [{}]: {}", path.display(), e))
    })?;
    decode(&contents)
}

// ─────────────────────────────────────────────────────────────────────────────
// File pair
// ─────────────────────────────────────────────────────────────────────────────

/// A private in/out file pair, deleted when dropped.
#[derive(Debug)]
pub struct IpcChannel {
    input: NamedTempFile,
    output: NamedTempFile,
}

impl IpcChannel {
    /// Create both files with owner-only permissions.
    pub fn create() -> Result<Self> {
        let input = create_file("in")?;
        let output = create_file("out")?;
        {
            let mut live = LIVE_FILES.lock();
            live.push(input.path().to_path_buf());
            live.push(output.path().to_path_buf());
        }
        debug!(
            input = %input.path().display(),
            output = %output.path().display(),
            "created IPC files"
        );
        Ok(Self { input, output })
    }

    pub fn input_path(&self) -> &Path {
        self.input.path()
    }

    pub fn output_path(&self) -> &Path {
        self.output.path()
    }

    /// Hand the current variables to the command.
    pub fn write_input(&self, variables: &Variables) -> Result<()> {
        write(self.input.path(), variables)
    }

    /// Read the variables the command published.
    pub fn read_output(&self) -> Result<Variables> {
        read(self.output.path())
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        let input = self.input.path();
        let output = self.output.path();
        LIVE_FILES.lock().retain(|p| p != input && p != output);
    }
}

fn create_file(suffix: &str) -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(FILE_PREFIX)
        .suffix(&format!(".{}", suffix))
        .tempfile()
        .map_err(|e| EngineError::Ipc(format!("failed to create IPC file: {}", e)))
}

/// Remove any IPC files still registered. Call once at process exit.
pub fn sweep() {
    let paths = std::mem::take(&mut *LIVE_FILES.lock());
    for path in paths {
        if let Err(e) = std::fs::remove_file(&path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "failed to remove IPC file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> Variables {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_round_trip_with_empty_value() {
        let vars = map(&[("a", "1"), ("b", "")]);
        assert_eq!(decode(&encode(&vars)).unwrap(), vars);
    }

    #[test]
    fn test_round_trip_binary_safe_values() {
        let vars = map(&[("multi", "line one\nline two\r\n"), ("space", "a b  c")]);
        assert_eq!(decode(&encode(&vars)).unwrap(), vars);
    }

    #[test]
    fn test_encode_format() {
        let vars = map(&[("key", "value")]);
        assert_eq!(encode(&vars), "a2V5 dmFsdWU=\n");
    }

    #[test]
    fn test_decode_ignores_blank_and_comment_lines() {
        let contents = "\n# comment\n   \na2V5 dmFsdWU=\n";
        assert_eq!(decode(contents).unwrap(), map(&[("key", "value")]));
    }

    #[test]
    fn test_decode_too_many_tokens() {
        let err = decode("a2V5 dmFsdWU= extra").unwrap_err();
        assert!(matches!(err, EngineError::Ipc(_)));
    }

    #[test]
    fn test_decode_bad_base64() {
        assert!(matches!(decode("!!!! dmFsdWU="), Err(EngineError::Ipc(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_key() {
        // "bad key"
        let line = format!("{} {}", STANDARD.encode("bad key"), STANDARD.encode("v"));
        assert!(matches!(decode(&line), Err(EngineError::Ipc(_))));
    }

    #[test]
    fn test_decode_accepts_scoped_key() {
        let line = format!("{} {}", STANDARD.encode("job.step.v"), STANDARD.encode("1"));
        assert_eq!(decode(&line).unwrap(), map(&[("job.step.v", "1")]));
    }

    #[test]
    fn test_channel_files_removed_on_drop() {
        let channel = IpcChannel::create().unwrap();
        let input = channel.input_path().to_path_buf();
        let output = channel.output_path().to_path_buf();
        assert!(input.exists());
        assert!(output.exists());
        assert!(
            input
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("pipeliner-ipc-")
        );

        channel.write_input(&map(&[("x", "1")])).unwrap();
        assert_eq!(read(&input).unwrap(), map(&[("x", "1")]));
        assert!(channel.read_output().unwrap().is_empty());

        drop(channel);
        assert!(!input.exists());
        assert!(!output.exists());
        assert!(!LIVE_FILES.lock().contains(&input));
    }

    #[cfg(unix)]
    #[test]
    fn test_channel_files_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let channel = IpcChannel::create().unwrap();
        let mode = std::fs::metadata(channel.input_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

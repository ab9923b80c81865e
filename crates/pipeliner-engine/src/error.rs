//! Error types for the pipeline engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while resolving, generating, or interpreting a pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed `${{ }}` content or an invalid conditional expression.
    #[error("{0}")]
    Syntax(String),

    /// A reference survived resolution, or a required variable is missing.
    #[error("{0}")]
    Unresolved(String),

    /// Invalid capture variable, working directory, shell, or frame override.
    #[error("{0}")]
    Configuration(String),

    /// Non-zero exit code, timeout, or spawn failure.
    #[error("{0}")]
    Process(String),

    /// Malformed IPC file or IPC I/O failure.
    #[error("{0}")]
    Ipc(String),

    /// The pipeline document could not be read or parsed.
    #[error("failed to load pipeline [{path}]: {message}")]
    Model { path: String, message: String },

    /// A `--` line that matches no known directive.
    #[error("unknown directive [{0}]")]
    UnknownDirective(String),

    /// A file's digest did not match the expected checksum.
    #[error("invalid checksum for file [{0}]")]
    Checksum(String),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An instruction failed; carries a description of the instruction.
    #[error("{source}")]
    Instruction {
        instruction: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Wrap an error with the instruction that raised it.
    pub fn instruction(instruction: impl Into<String>, source: EngineError) -> Self {
        EngineError::Instruction {
            instruction: instruction.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping instruction wrappers.
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::Instruction { source, .. } => source.root(),
            other => other,
        }
    }
}

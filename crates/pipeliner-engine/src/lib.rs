//! Pipeline execution engine.
//!
//! Runs a tree of **pipeline → job → step → command** nodes described in a
//! YAML document. Each node can declare environment variables and variables,
//! guard itself with `enabled`/`if`, and override the working directory,
//! shell, and timeout. Commands can capture their output into variables or
//! exchange variables with the engine through a pair of IPC files.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌──────────────┐   ┌─────────────┐
//! │  model   │──▶│ generator │──▶│ instructions │──▶│ interpreter │
//! │ (YAML)   │   │           │   │  (flat IR)   │   │  + Context  │
//! └──────────┘   └───────────┘   └──────────────┘   └──────┬──────┘
//!                                                          │
//!                       ┌──────────────┬───────────────────┤
//!                       ▼              ▼                   ▼
//!                  ┌─────────┐   ┌───────────┐      ┌────────────┐
//!                  │resolver │   │  command  │◀────▶│    ipc     │
//!                  │ + lexer │   │(subprocess)│      │ (in / out) │
//!                  └─────────┘   └───────────┘      └────────────┘
//! ```
//!
//! # Interpolation
//!
//! - `${{ name }}`, `${{ step.name }}`, `${{ required:name }}`: variables
//! - `$NAME`, `${NAME}`: environment variables
//! - `\$` suppresses interpolation

pub mod checksum;
pub mod command;
pub mod console;
pub mod context;
pub mod directive;
pub mod engine;
pub mod error;
pub mod expression;
pub mod frame;
pub mod generator;
pub mod instruction;
pub mod interpreter;
pub mod ipc;
pub mod lexer;
pub mod lines;
pub mod model;
pub mod resolver;
pub mod shell;
pub mod validate;
pub mod variable;

pub use command::{CaptureMode, CommandLine, CommandOptions};
pub use console::{Console, MemoryConsole, StdConsole, Verbosity};
pub use context::Context;
pub use engine::{Engine, PIPELINER_TMP, PIPELINER_VERSION, VERSION};
pub use error::{EngineError, Result};
pub use frame::{Frame, FrameKind};
pub use generator::generate;
pub use instruction::{Flow, FrameStatus, Instruction};
pub use interpreter::Outcome;
pub use lexer::{Token, TokenCache, TokenKind};
pub use model::{Job, NodeSettings, Pipeline, Step};
pub use resolver::{Resolver, Variables};
pub use shell::Shell;
pub use validate::{ValidationError, validate};
pub use variable::{Modifier, ParsedVariable};

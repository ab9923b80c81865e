//! Human-facing output sink.
//!
//! Progress lines (`@pipeline ... status=[running]`, `@command ...`,
//! `@output ...`) go through a [`Console`] owned by the run's context.
//! Diagnostics go through `tracing` instead.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

/// Timestamp prefix format.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// How much a console wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Echo every command and status line.
    #[default]
    Normal,
    /// Only lines starting with `$`, `>` or `@error` are shown.
    Minimal,
}

impl Verbosity {
    pub fn is_normal(self) -> bool {
        self == Verbosity::Normal
    }
}

/// Destination for progress and command output lines.
pub trait Console: Send {
    /// Write one line.
    fn println(&mut self, line: &str);

    /// Write one line with the `@error` prefix.
    fn error(&mut self, line: &str) {
        self.println(&format!("@error {}", line));
    }

    fn verbosity(&self) -> Verbosity {
        Verbosity::Normal
    }
}

/// Returns true if a line is shown in minimal mode.
fn shown_when_minimal(line: &str) -> bool {
    line.starts_with('$') || line.starts_with('>') || line.starts_with("@error")
}

// ─────────────────────────────────────────────────────────────────────────────
// Standard output
// ─────────────────────────────────────────────────────────────────────────────

/// Console writing to standard output.
#[derive(Debug, Default)]
pub struct StdConsole {
    timestamps: bool,
    minimal: bool,
}

impl StdConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix each line with a local timestamp.
    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Suppress everything except `$`, `>` and `@error` lines.
    pub fn with_minimal(mut self, minimal: bool) -> Self {
        self.minimal = minimal;
        self
    }

    fn format(&self, line: &str) -> Option<String> {
        if self.minimal && !shown_when_minimal(line) {
            return None;
        }
        if self.timestamps {
            let now = chrono::Local::now().format(TIMESTAMP_FORMAT);
            Some(format!("{} {}", now, line))
        } else {
            Some(line.to_string())
        }
    }
}

impl Console for StdConsole {
    fn println(&mut self, line: &str) {
        if let Some(line) = self.format(line) {
            let mut out = std::io::stdout().lock();
            // A closed stdout is not worth failing the pipeline over
            let _ = writeln!(out, "{}", line);
            let _ = out.flush();
        }
    }

    fn verbosity(&self) -> Verbosity {
        if self.minimal {
            Verbosity::Minimal
        } else {
            Verbosity::Normal
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// Console that records lines in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryConsole {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// True if any recorded line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }
}

impl Console for MemoryConsole {
    fn println(&mut self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

//! Run-time scope records.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};

/// Level of the pipeline tree a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Pipeline,
    Job,
    Step,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Pipeline => "pipeline",
            FrameKind::Job => "job",
            FrameKind::Step => "step",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One active pipeline, job, or step scope.
///
/// Override fields start unset and can each be set once.
#[derive(Debug, Clone)]
pub struct Frame {
    kind: FrameKind,
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    working_directory: Option<String>,
    shell: Option<String>,
    timeout_minutes: Option<String>,
    started: Instant,
}

impl Frame {
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            id: None,
            name: None,
            description: None,
            working_directory: None,
            shell: None,
            timeout_minutes: None,
            started: Instant::now(),
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    pub fn shell(&self) -> Option<&str> {
        self.shell.as_deref()
    }

    pub fn timeout_minutes(&self) -> Option<&str> {
        self.timeout_minutes.as_deref()
    }

    pub fn set_working_directory(&mut self, value: impl Into<String>) -> Result<()> {
        set_once(&mut self.working_directory, value.into(), "working-directory", self.kind)
    }

    pub fn set_shell(&mut self, value: impl Into<String>) -> Result<()> {
        set_once(&mut self.shell, value.into(), "shell", self.kind)
    }

    pub fn set_timeout_minutes(&mut self, value: impl Into<String>) -> Result<()> {
        set_once(&mut self.timeout_minutes, value.into(), "timeout-minutes", self.kind)
    }

    /// Time since the frame was pushed.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Elapsed milliseconds with four decimal places, e.g. `12.3456`.
    pub fn elapsed_millis(&self) -> String {
        format!("{:.4}", self.elapsed().as_nanos() as f64 / 1_000_000.0)
    }
}

fn set_once(slot: &mut Option<String>, value: String, field: &str, kind: FrameKind) -> Result<()> {
    if slot.is_some() {
        return Err(EngineError::Configuration(format!(
            "{} already set for {} frame",
            field, kind
        )));
    }
    *slot = Some(value);
    Ok(())
}

/// Console form: `@<kind>` plus non-blank `name=[..]` and `description=[..]`.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.kind)?;
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            write!(f, " name=[{}]", name)?;
        }
        if let Some(description) = self
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
        {
            write!(f, " description=[{}]", description)?;
        }
        Ok(())
    }
}

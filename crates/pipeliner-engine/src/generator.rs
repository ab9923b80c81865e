//! Lowers a pipeline tree into a flat instruction sequence.
//!
//! Every node emits, in order:
//!
//! 1. `PushFrame`
//! 2. `SetWorkingDirectory` / `SetShell` / `SetTimeoutMinutes` when declared
//! 3. `SetEnvironmentVariable` per `env` entry, `SetVariable` per `with` entry
//! 4. `EvaluateEnabled`, then `EvaluateConditional` when `if` is declared
//! 5. `PrintFrameStatus(running)`
//! 6. the children (jobs, steps, or command instructions)
//! 7. `PrintFrameStatus(success)` and `PopFrame`

use tracing::debug;

use crate::directive;
use crate::error::{EngineError, Result};
use crate::frame::FrameKind;
use crate::instruction::{FrameStatus, Instruction};
use crate::lines::logical_lines;
use crate::model::{label, NodeKind, NodeSettings, Pipeline, Step};

const CAPTURE_PREFIX: &str = "--capture";
const DIRECTIVE_PREFIX: &str = "--";
const EXIT_PREFIX: &str = "exit ";

/// Generate the instruction sequence for `pipeline`.
pub fn generate(pipeline: &Pipeline) -> Result<Vec<Instruction>> {
    let mut out = Vec::new();

    open(&mut out, NodeKind::Pipeline, &pipeline.settings)?;
    for job in &pipeline.jobs {
        open(&mut out, NodeKind::Job, &job.settings)?;
        for step in &job.steps {
            open(&mut out, NodeKind::Step, &step.settings)?;
            commands(&mut out, step)?;
            close(&mut out);
        }
        close(&mut out);
    }
    close(&mut out);

    debug!(instructions = out.len(), "generated instructions");
    Ok(out)
}

fn frame_kind(kind: NodeKind) -> FrameKind {
    match kind {
        NodeKind::Pipeline => FrameKind::Pipeline,
        NodeKind::Job => FrameKind::Job,
        NodeKind::Step => FrameKind::Step,
    }
}

fn open(out: &mut Vec<Instruction>, kind: NodeKind, settings: &NodeSettings) -> Result<()> {
    out.push(Instruction::PushFrame {
        kind: frame_kind(kind),
        id: settings.id.clone(),
        name: settings.name.clone(),
        description: settings.description.clone(),
    });

    if let Some(dir) = &settings.working_directory {
        out.push(Instruction::SetWorkingDirectory(dir.clone()));
    }
    if let Some(shell) = &settings.shell {
        out.push(Instruction::SetShell(shell.clone()));
    }
    if let Some(minutes) = &settings.timeout_minutes {
        out.push(Instruction::SetTimeoutMinutes(minutes.clone()));
    }

    for (name, value) in &settings.env {
        out.push(Instruction::SetEnvironmentVariable {
            name: name.clone(),
            value: value.clone(),
        });
    }
    for (name, value) in &settings.variables {
        out.push(Instruction::SetVariable {
            name: name.clone(),
            value: value.clone(),
        });
    }

    let enabled = settings.enabled().ok_or_else(|| {
        EngineError::Configuration(format!(
            "{} -> invalid enabled value [{}]",
            label(kind, settings),
            settings.enabled.as_deref().unwrap_or_default()
        ))
    })?;
    out.push(Instruction::EvaluateEnabled(enabled));

    if let Some(conditional) = &settings.conditional {
        out.push(Instruction::EvaluateConditional(conditional.clone()));
    }

    out.push(Instruction::PrintFrameStatus(FrameStatus::Running));
    Ok(())
}

fn close(out: &mut Vec<Instruction>) {
    out.push(Instruction::PrintFrameStatus(FrameStatus::Success));
    out.push(Instruction::PopFrame);
}

fn commands(out: &mut Vec<Instruction>, step: &Step) -> Result<()> {
    for line in logical_lines(&step.run) {
        let line = line.trim();
        let instruction = if line.starts_with(CAPTURE_PREFIX) {
            Instruction::ExecuteCommand { line: line.into() }
        } else if line.starts_with(DIRECTIVE_PREFIX) {
            directive::parse(line)?
        } else if line.starts_with(EXIT_PREFIX) {
            Instruction::Exit { line: line.into() }
        } else {
            Instruction::ExecuteCommand { line: line.into() }
        };
        out.push(instruction);
    }
    Ok(())
}

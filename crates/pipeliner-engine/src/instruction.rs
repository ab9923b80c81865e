//! The instruction set the generator emits and the interpreter executes.

use std::collections::VecDeque;
use std::fmt;

use tracing::trace;

use crate::command::{self, CommandOptions};
use crate::context::Context;
use crate::directive::{self, PrintLevel};
use crate::error::{EngineError, Result};
use crate::expression;
use crate::frame::{Frame, FrameKind};

/// What the interpreter does after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop the run with this exit code.
    Exit(i32),
}

/// Frame status reported by [`Instruction::PrintFrameStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Running,
    Success,
    Failure,
    Disabled,
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameStatus::Running => "running",
            FrameStatus::Success => "success",
            FrameStatus::Failure => "failure",
            FrameStatus::Disabled => "disabled",
        })
    }
}

/// One step of a generated program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    PushFrame {
        kind: FrameKind,
        id: Option<String>,
        name: Option<String>,
        description: Option<String>,
    },
    PopFrame,
    SetVariable {
        name: String,
        value: String,
    },
    RemoveVariable {
        name: String,
    },
    SetEnvironmentVariable {
        name: String,
        value: String,
    },
    RemoveEnvironmentVariable {
        name: String,
    },
    SetWorkingDirectory(String),
    SetShell(String),
    SetTimeoutMinutes(String),
    /// Skip the rest of the current frame when `false`.
    EvaluateEnabled(bool),
    /// Skip the rest of the current frame when the expression is `false`.
    EvaluateConditional(String),
    PrintFrameStatus(FrameStatus),
    /// Run a command line, optionally capturing its output.
    ExecuteCommand {
        line: String,
    },
    /// `exit N`.
    Exit {
        line: String,
    },
    /// `--print`, `--print:info`, `--print:warning`, `--print:error`.
    Print {
        level: PrintLevel,
        message: String,
    },
    /// `--checksum <file> <digest>`.
    VerifyChecksum {
        line: String,
    },
    /// `--extension <archive> [digest]`.
    RunExtension {
        line: String,
    },
    /// `--pipeline <file>`.
    ExecutePipeline {
        line: String,
    },
}

impl Instruction {
    /// Frame a `PushFrame` would create, without side effects.
    fn frame(&self) -> Option<Frame> {
        match self {
            Instruction::PushFrame {
                kind,
                id,
                name,
                description,
            } => Some(
                Frame::new(*kind)
                    .with_id(id.clone())
                    .with_name(name.clone())
                    .with_description(description.clone()),
            ),
            _ => None,
        }
    }

    /// Execute against `context`. `remaining` holds the instructions not yet run.
    pub async fn execute(
        &self,
        context: &mut Context,
        remaining: &mut VecDeque<Instruction>,
    ) -> Result<Flow> {
        trace!(instruction = ?self, "execute");
        match self {
            Instruction::PushFrame { .. } => {
                if let Some(frame) = self.frame() {
                    context.push_frame(frame);
                }
            }
            Instruction::PopFrame => {
                context.pop_frame()?;
            }
            Instruction::SetVariable { name, value } => {
                context.set_variable(name, value);
            }
            Instruction::RemoveVariable { name } => {
                context.remove_variable(name);
            }
            Instruction::SetEnvironmentVariable { name, value } => {
                context.set_environment_variable(name, value);
            }
            Instruction::RemoveEnvironmentVariable { name } => {
                context.remove_environment_variable(name);
            }
            Instruction::SetWorkingDirectory(value) => {
                context.frame_mut()?.set_working_directory(value.clone())?;
            }
            Instruction::SetShell(value) => {
                context.frame_mut()?.set_shell(value.clone())?;
            }
            Instruction::SetTimeoutMinutes(value) => {
                context.frame_mut()?.set_timeout_minutes(value.clone())?;
            }
            Instruction::EvaluateEnabled(enabled) => {
                if !enabled {
                    skip_disabled(context, remaining)?;
                }
            }
            Instruction::EvaluateConditional(expression) => {
                let resolved = context.resolve_all_variables(expression)?;
                trace!(expression = %resolved, "evaluating conditional");
                if !expression::evaluate(&resolved)? {
                    skip_disabled(context, remaining)?;
                }
            }
            Instruction::PrintFrameStatus(status) => {
                let line = format!("{} status=[{}]", context.frame()?, status);
                context.console().println(&line);
            }
            Instruction::ExecuteCommand { line } => {
                command::execute(context, line, CommandOptions::default()).await?;
            }
            Instruction::Exit { line } => {
                if context.console().verbosity().is_normal() {
                    context.console().println(&format!("@run {}", line));
                }
                return Ok(Flow::Exit(parse_exit_code(line)));
            }
            Instruction::Print { level, message } => {
                directive::print(context, *level, message)?;
            }
            Instruction::VerifyChecksum { line } => {
                directive::verify_checksum(context, line, true)?;
            }
            Instruction::RunExtension { line } => {
                directive::run_extension(context, line).await?;
            }
            Instruction::ExecutePipeline { line } => {
                directive::execute_pipeline(context, line).await?;
            }
        }
        Ok(Flow::Continue)
    }
}

/// Parse the code after the first space of an `exit N` line; 1 if unparsable.
fn parse_exit_code(line: &str) -> i32 {
    line.trim()
        .split_once(' ')
        .and_then(|(_, code)| code.trim().parse().ok())
        .unwrap_or(1)
}

/// Consume the rest of the current frame's body without executing it.
///
/// Reports the current frame and every nested frame as disabled. Stops at
/// the current frame's own `PopFrame`, which is left in place so the frame
/// is popped normally.
fn skip_disabled(context: &mut Context, remaining: &mut VecDeque<Instruction>) -> Result<()> {
    let line = format!("{} status=[{}]", context.frame()?, FrameStatus::Disabled);
    context.console().println(&line);

    let mut depth = 0usize;
    while let Some(next) = remaining.front() {
        match next {
            Instruction::PushFrame { .. } => {
                if let Some(frame) = next.frame() {
                    let line = format!("{} status=[{}]", frame, FrameStatus::Disabled);
                    context.console().println(&line);
                }
                depth += 1;
            }
            Instruction::PopFrame if depth == 0 => break,
            Instruction::PopFrame => depth -= 1,
            _ => {}
        }
        remaining.pop_front();
    }

    if depth != 0 {
        return Err(EngineError::Configuration(
            "unbalanced frames while skipping disabled instructions".into(),
        ));
    }
    Ok(())
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushFrame { kind, name, .. } => {
                write!(f, "PushFrame {{ kind [{}] name [{}] }}", kind, name.as_deref().unwrap_or(""))
            }
            Instruction::PopFrame => f.write_str("PopFrame"),
            Instruction::SetVariable { name, value } => {
                write!(f, "SetVariable {{ name [{}] value [{}] }}", name, value)
            }
            Instruction::RemoveVariable { name } => write!(f, "RemoveVariable {{ name [{}] }}", name),
            Instruction::SetEnvironmentVariable { name, value } => {
                write!(f, "SetEnvironmentVariable {{ name [{}] value [{}] }}", name, value)
            }
            Instruction::RemoveEnvironmentVariable { name } => {
                write!(f, "RemoveEnvironmentVariable {{ name [{}] }}", name)
            }
            Instruction::SetWorkingDirectory(v) => write!(f, "SetWorkingDirectory {{ [{}] }}", v),
            Instruction::SetShell(v) => write!(f, "SetShell {{ [{}] }}", v),
            Instruction::SetTimeoutMinutes(v) => write!(f, "SetTimeoutMinutes {{ [{}] }}", v),
            Instruction::EvaluateEnabled(v) => write!(f, "EvaluateEnabled {{ [{}] }}", v),
            Instruction::EvaluateConditional(v) => write!(f, "EvaluateConditional {{ [{}] }}", v),
            Instruction::PrintFrameStatus(s) => write!(f, "PrintFrameStatus {{ [{}] }}", s),
            Instruction::ExecuteCommand { line } => write!(f, "ExecuteCommand {{ line [{}] }}", line),
            Instruction::Exit { line } => write!(f, "Exit {{ line [{}] }}", line),
            Instruction::Print { level, message } => {
                write!(f, "Print {{ level [{:?}] message [{}] }}", level, message)
            }
            Instruction::VerifyChecksum { line } => write!(f, "VerifyChecksum {{ line [{}] }}", line),
            Instruction::RunExtension { line } => write!(f, "RunExtension {{ line [{}] }}", line),
            Instruction::ExecutePipeline { line } => {
                write!(f, "ExecutePipeline {{ line [{}] }}", line)
            }
        }
    }
}

//! Walks an instruction sequence against a context.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::instruction::{Flow, Instruction};

/// How a run ended when no instruction failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every instruction ran.
    Completed,
    /// An `exit N` line stopped the run.
    Exit(i32),
}

/// Execute `instructions` in order.
///
/// Instructions may consume their successors (disabled frames do). A failing
/// instruction stops the run and its error is wrapped with the instruction's
/// description; frames it left open stay on the context's stack.
pub async fn run(context: &mut Context, instructions: Vec<Instruction>) -> Result<Outcome> {
    let mut remaining: VecDeque<Instruction> = instructions.into();
    debug!(instructions = remaining.len(), "interpreting");

    while let Some(instruction) = remaining.pop_front() {
        trace!(%instruction, depth = context.depth(), "next instruction");
        match instruction.execute(context, &mut remaining).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit(code)) => {
                debug!(code, "exit requested");
                return Ok(Outcome::Exit(code));
            }
            Err(err) => return Err(EngineError::instruction(instruction.to_string(), err)),
        }
    }

    Ok(Outcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::MemoryConsole;
    use crate::frame::FrameKind;
    use crate::instruction::FrameStatus;

    fn push(kind: FrameKind) -> Instruction {
        Instruction::PushFrame {
            kind,
            id: None,
            name: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_completed_run_pops_all_frames() {
        let console = MemoryConsole::new();
        let mut context = Context::new(Box::new(console.clone()));
        let outcome = run(
            &mut context,
            vec![
                push(FrameKind::Pipeline),
                Instruction::SetVariable {
                    name: "a".into(),
                    value: "1".into(),
                },
                Instruction::PrintFrameStatus(FrameStatus::Running),
                Instruction::RemoveVariable { name: "a".into() },
                Instruction::PrintFrameStatus(FrameStatus::Success),
                Instruction::PopFrame,
            ],
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(context.depth(), 0);
        assert!(context.variables().is_empty());
        assert_eq!(
            console.lines(),
            vec!["@pipeline status=[running]", "@pipeline status=[success]"]
        );
    }

    #[tokio::test]
    async fn test_exit_stops_run_with_frames_open() {
        let mut context = Context::new(Box::new(MemoryConsole::new()));
        let outcome = run(
            &mut context,
            vec![
                push(FrameKind::Pipeline),
                Instruction::Exit {
                    line: "exit 7".into(),
                },
                Instruction::SetVariable {
                    name: "never".into(),
                    value: "x".into(),
                },
                Instruction::PopFrame,
            ],
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Exit(7));
        assert_eq!(context.depth(), 1);
        assert!(context.variables().get("never").is_none());
    }

    #[tokio::test]
    async fn test_failure_is_wrapped() {
        let mut context = Context::new(Box::new(MemoryConsole::new()));
        let err = run(
            &mut context,
            vec![
                push(FrameKind::Step),
                Instruction::EvaluateConditional("1 +".into()),
                Instruction::PopFrame,
            ],
        )
        .await
        .unwrap_err();
        match &err {
            EngineError::Instruction { instruction, .. } => {
                assert!(instruction.starts_with("EvaluateConditional"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.root(), EngineError::Syntax(_)));
        assert_eq!(context.depth(), 1);
    }
}

//! Subprocess execution for command lines.
//!
//! A command line may start with a capture prefix:
//!
//! - `--capture ${{ name }} <command>` replaces `name` with the output.
//! - `--capture:append ${{ name }} <command>` appends the output to `name`.
//!
//! Without a capture prefix each output line is printed as `@output <line>`.
//! Standard error is merged into standard output. Captured output and IPC
//! results are only published when the process exits with code 0.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::ipc::{self, IpcChannel};
use crate::shell::Shell;
use crate::validate::MAX_TIMEOUT_MINUTES;
use crate::variable::{canonical_key, is_identifier};

const CAPTURE_PREFIX: &str = "--capture";

static CAPTURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^--capture(:append)?\s*\$\{\{\s*([^}]*?)\s*}}\s+(.+)$")
        .expect("capture pattern is valid")
});

/// How a command's output is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureMode {
    None,
    Overwrite(String),
    Append(String),
}

/// A command line split into its capture mode and command text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub capture: CaptureMode,
    pub command: String,
}

impl CommandLine {
    /// Split a raw command line. Variable references are not resolved.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if !line.starts_with(CAPTURE_PREFIX) {
            return Ok(Self {
                capture: CaptureMode::None,
                command: line.to_string(),
            });
        }

        let captures = CAPTURE.captures(line).ok_or_else(|| {
            EngineError::Configuration(format!("invalid capture syntax [{}]", line))
        })?;
        let name = captures[2].to_string();
        if !is_identifier(&name) {
            return Err(EngineError::Configuration(format!(
                "invalid capture variable [{}]",
                name
            )));
        }
        let command = captures[3].trim().to_string();
        let capture = if captures.get(1).is_some() {
            CaptureMode::Append(name)
        } else {
            CaptureMode::Overwrite(name)
        };
        Ok(Self { capture, command })
    }

    pub fn is_capturing(&self) -> bool {
        self.capture != CaptureMode::None
    }
}

/// Per-invocation execution options.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    /// Run here instead of the context's working directory.
    pub working_directory: Option<PathBuf>,
    /// Print `@command <line>` before running.
    pub echo: bool,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            working_directory: None,
            echo: true,
        }
    }
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

/// Run one command line against `context`.
pub async fn execute(context: &mut Context, line: &str, options: CommandOptions) -> Result<()> {
    let line = line.trim();
    let parsed = CommandLine::parse(line)?;
    let command = context.resolve_variables(&parsed.command)?;
    trace!(command = %command, capture = ?parsed.capture, "resolved command");

    if options.echo && context.console().verbosity().is_normal() {
        context.console().println(&format!("@command {}", line));
    }

    let shell: Shell = context.shell()?.parse()?;
    let working_directory = match options.working_directory {
        Some(dir) => dir,
        None => PathBuf::from(context.working_directory()?),
    };
    check_working_directory(&working_directory)?;
    let minutes = parse_timeout_minutes(&context.timeout_minutes()?)?;
    let environment = context.command_environment()?;

    let channel = IpcChannel::create()?;
    channel.write_input(context.variables())?;

    let argv = shell.argv(&command);
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| EngineError::Configuration(format!("empty command [{}]", line)))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&working_directory)
        .envs(&environment)
        .env(ipc::IPC_IN, channel.input_path())
        .env(ipc::IPC_OUT, channel.output_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(
        shell = %shell,
        working_directory = %working_directory.display(),
        timeout_minutes = minutes,
        "spawning command"
    );
    let mut child = cmd
        .spawn()
        .map_err(|e| EngineError::Process(format!("failed to spawn [{}]: {}", program, e)))?;

    // Two readers feed one channel so stdout and stderr interleave by arrival
    let (tx, mut rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, tx.clone());
    }
    drop(tx);

    let capturing = parsed.is_capturing();
    let mut captured: Vec<String> = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(minutes * 60);

    let run = async {
        while let Some(output) = rx.recv().await {
            if capturing {
                captured.push(output);
            } else {
                context.console().println(&format!("@output {}", output));
            }
        }
        child.wait().await
    };

    let status = match tokio::time::timeout_at(deadline, run).await {
        Ok(status) => status?,
        Err(_) => {
            warn!(command = %line, minutes, "command timed out");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill timed out command");
            }
            return Err(EngineError::Process(format!(
                "process timed out after [{}] minute(s)",
                minutes
            )));
        }
    };

    let code = status
        .code()
        .ok_or_else(|| EngineError::Process("process terminated by signal".into()))?;
    debug!(code, "command exited");
    if code != 0 {
        return Err(EngineError::Process(format!("exit code [{}]", code)));
    }

    match &parsed.capture {
        CaptureMode::None => {}
        CaptureMode::Overwrite(name) => {
            let value = finish_capture(&captured);
            context.set_scoped_variable(name, &value);
        }
        CaptureMode::Append(name) => {
            let value = finish_capture(&captured);
            let value = match context.variables().get(&canonical_key(name)) {
                Some(prior) if !prior.is_empty() => format!("{}\n{}", prior, value),
                _ => value,
            };
            context.set_scoped_variable(name, &value);
        }
    }

    for (key, value) in channel.read_output()? {
        if key.contains('.') {
            context.set_variable(&key, &value);
        } else {
            context.set_scoped_variable(&key, &value);
        }
    }

    Ok(())
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Join captured lines, strip trailing line breaks, and escape CR and LF.
fn finish_capture(lines: &[String]) -> String {
    lines
        .join("\n")
        .trim_end_matches(['\r', '\n'])
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}

fn check_working_directory(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|_| {
        EngineError::Configuration(format!(
            "working-directory [{}] does not exist",
            path.display()
        ))
    })?;
    if !metadata.is_dir() {
        return Err(EngineError::Configuration(format!(
            "working-directory [{}] is not a directory",
            path.display()
        )));
    }
    std::fs::read_dir(path).map_err(|_| {
        EngineError::Configuration(format!(
            "working-directory [{}] is not readable",
            path.display()
        ))
    })?;
    Ok(())
}

fn parse_timeout_minutes(value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(minutes) if (1..=u64::from(MAX_TIMEOUT_MINUTES)).contains(&minutes) => Ok(minutes),
        _ => Err(EngineError::Configuration(format!(
            "invalid timeout-minutes [{}]",
            value
        ))),
    }
}

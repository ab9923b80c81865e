//! `--` directives embedded in a step's `run` body.
//!
//! | directive | effect |
//! |-----------|--------|
//! | `--print <msg>` | print a message |
//! | `--print:info <msg>` | print `@info <msg>` |
//! | `--print:warning <msg>` | print `@warning <msg>` |
//! | `--print:error <msg>` | print `@error <msg>` |
//! | `--checksum <file> <digest>` | verify a SHA-256 or SHA-512 digest |
//! | `--extension <archive> [digest]` | unpack an archive and run its `run.sh` |
//! | `--pipeline <file>` | run another pipeline document in the same context |
//!
//! A directive name must be followed by a space.

use std::ffi::OsString;
use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::checksum;
use crate::command::{self, CommandOptions};
use crate::context::Context;
use crate::engine;
use crate::error::{EngineError, Result};
use crate::instruction::Instruction;
use crate::shell::split_arguments;

const PRINT: &str = "--print";
const PRINT_INFO: &str = "--print:info";
const PRINT_WARNING: &str = "--print:warning";
const PRINT_ERROR: &str = "--print:error";
const CHECKSUM: &str = "--checksum";
const SHA_CHECKSUM: &str = "--sha-checksum";
const EXTENSION: &str = "--extension";
const PIPELINE: &str = "--pipeline";

/// Script an extension archive must contain.
const EXTENSION_ENTRY_POINT: &str = "run.sh";

/// Severity of a `--print` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintLevel {
    Plain,
    Info,
    Warning,
    Error,
}

/// Returns the text after `prefix ` if `line` starts with it.
fn argument<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_prefix(' ').map(str::trim)
}

/// Translate a directive line into an instruction.
pub fn parse(line: &str) -> Result<Instruction> {
    let line = line.trim();

    let print = [
        (PRINT_INFO, PrintLevel::Info),
        (PRINT_WARNING, PrintLevel::Warning),
        (PRINT_ERROR, PrintLevel::Error),
        (PRINT, PrintLevel::Plain),
    ];
    for (prefix, level) in print {
        if let Some(message) = argument(line, prefix) {
            return Ok(Instruction::Print {
                level,
                message: message.to_string(),
            });
        }
    }

    if argument(line, CHECKSUM).is_some() || argument(line, SHA_CHECKSUM).is_some() {
        return Ok(Instruction::VerifyChecksum { line: line.into() });
    }
    if argument(line, EXTENSION).is_some() {
        return Ok(Instruction::RunExtension { line: line.into() });
    }
    if argument(line, PIPELINE).is_some() {
        return Ok(Instruction::ExecutePipeline { line: line.into() });
    }

    Err(EngineError::UnknownDirective(line.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Print
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve pipeline variables in `message` and print it.
pub fn print(context: &mut Context, level: PrintLevel, message: &str) -> Result<()> {
    let message = context.resolve_variables(message)?.replace("\\$", "$");
    match level {
        PrintLevel::Plain => context.console().println(&message),
        PrintLevel::Info => context.console().println(&format!("@info {}", message)),
        PrintLevel::Warning => context.console().println(&format!("@warning {}", message)),
        PrintLevel::Error => context.console().error(&message),
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Checksum
// ─────────────────────────────────────────────────────────────────────────────

/// Verify `--checksum <file> <digest>` relative to the working directory.
pub fn verify_checksum(context: &mut Context, line: &str, echo: bool) -> Result<()> {
    let line = line.trim();
    let normal = context.console().verbosity().is_normal();
    if echo && normal {
        context.console().println(&format!("@command {}", line));
    }

    let resolved = context.resolve_all_variables(line)?;
    let arguments = split_arguments(&resolved);
    let [_, filename, digest] = arguments.as_slice() else {
        return Err(EngineError::Syntax(format!(
            "invalid syntax for --checksum directive [{}]",
            line
        )));
    };

    let path = Path::new(&context.working_directory()?).join(filename);
    debug!(path = %path.display(), "verifying checksum");
    if !checksum::verify(&path, digest)? {
        return Err(EngineError::Checksum(filename.clone()));
    }
    if normal {
        context.console().println("@output checksum is valid");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Extension
// ─────────────────────────────────────────────────────────────────────────────

/// Unpack a local archive into a private directory and run its `run.sh`.
pub async fn run_extension(context: &mut Context, line: &str) -> Result<()> {
    let line = line.trim();
    if context.console().verbosity().is_normal() {
        context.console().println(&format!("@command {}", line));
    }

    let resolved = context.resolve_all_variables(line)?;
    let arguments = split_arguments(&resolved);
    let (archive, digest) = match arguments.as_slice() {
        [_, archive] => (archive, None),
        [_, archive, digest] => (archive, Some(digest)),
        _ => {
            return Err(EngineError::Syntax(format!(
                "invalid syntax for --extension directive [{}]",
                line
            )));
        }
    };

    let archive_path = Path::new(&context.working_directory()?).join(archive);
    if let Some(digest) = digest
        && !checksum::verify(&archive_path, digest)?
    {
        return Err(EngineError::Checksum(archive.clone()));
    }

    let dir = tempfile::Builder::new()
        .prefix("pipeliner-extension-")
        .tempdir()?;
    extract(&archive_path, dir.path()).await?;

    let entry_point = dir.path().join(EXTENSION_ENTRY_POINT);
    if !entry_point.is_file() {
        return Err(EngineError::Configuration(format!(
            "extension [{}] does not contain {}",
            archive, EXTENSION_ENTRY_POINT
        )));
    }
    make_executable(&entry_point)?;

    debug!(archive = %archive_path.display(), dir = %dir.path().display(), "running extension");
    command::execute(
        context,
        &format!("./{}", EXTENSION_ENTRY_POINT),
        CommandOptions::new()
            .with_working_directory(dir.path())
            .with_echo(false),
    )
    .await
}

/// Program and arguments of the system tool that unpacks `archive` into `dir`.
fn extract_command(archive: &Path, dir: &Path) -> Result<(&'static str, Vec<OsString>)> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let (program, flag, target_flag) = if name.ends_with(".zip") {
        ("unzip", "-q", "-d")
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        ("tar", "-xzf", "-C")
    } else if name.ends_with(".tar.xz") {
        ("tar", "-xJf", "-C")
    } else if name.ends_with(".tar.bz2") {
        ("tar", "-xjf", "-C")
    } else if name.ends_with(".tar") {
        ("tar", "-xf", "-C")
    } else {
        return Err(EngineError::Configuration(format!(
            "unsupported extension archive [{}]",
            archive.display()
        )));
    };

    let args = vec![
        OsString::from(flag),
        archive.as_os_str().to_owned(),
        OsString::from(target_flag),
        dir.as_os_str().to_owned(),
    ];
    Ok((program, args))
}

async fn extract(archive: &Path, dir: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(EngineError::Configuration(format!(
            "extension archive [{}] does not exist",
            archive.display()
        )));
    }
    let (program, args) = extract_command(archive, dir)?;
    let output = Command::new(program)
        .args(&args)
        .output()
        .await
        .map_err(|e| EngineError::Process(format!("failed to spawn [{}]: {}", program, e)))?;
    if !output.status.success() {
        return Err(EngineError::Process(format!(
            "failed to extract [{}]: {}",
            archive.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Nested pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Run another pipeline document with the current context.
pub async fn execute_pipeline(context: &mut Context, line: &str) -> Result<()> {
    let line = line.trim();
    let filename = argument(line, PIPELINE).unwrap_or_default();
    let filename = context.resolve_all_variables(filename)?;
    let path = Path::new(&context.working_directory()?).join(&filename);
    debug!(path = %path.display(), "executing nested pipeline");

    let code = engine::run_file(context, &path).await;
    if code != 0 {
        return Err(EngineError::Process(format!(
            "pipeline [{}] failed with exit code [{}]",
            filename, code
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::MemoryConsole;
    use crate::frame::{Frame, FrameKind};
    use tempfile::TempDir;

    fn context(console: &MemoryConsole) -> Context {
        let mut context = Context::new(Box::new(console.clone()));
        context.push_frame(Frame::new(FrameKind::Step));
        context
    }

    #[test]
    fn test_parse_print_levels() {
        assert_eq!(
            parse("--print hello").unwrap(),
            Instruction::Print {
                level: PrintLevel::Plain,
                message: "hello".into()
            }
        );
        assert_eq!(
            parse("--print:warning  careful ").unwrap(),
            Instruction::Print {
                level: PrintLevel::Warning,
                message: "careful".into()
            }
        );
    }

    #[test]
    fn test_parse_other_directives() {
        assert!(matches!(
            parse("--checksum a.txt abc").unwrap(),
            Instruction::VerifyChecksum { .. }
        ));
        assert!(matches!(
            parse("--sha-checksum a.txt abc").unwrap(),
            Instruction::VerifyChecksum { .. }
        ));
        assert!(matches!(
            parse("--extension ext.tar.gz").unwrap(),
            Instruction::RunExtension { .. }
        ));
        assert!(matches!(
            parse("--pipeline other.yaml").unwrap(),
            Instruction::ExecutePipeline { .. }
        ));
    }

    #[test]
    fn test_parse_unknown_directive() {
        let err = parse("--frobnicate now").unwrap_err();
        assert_eq!(err.to_string(), "unknown directive [--frobnicate now]");
        // Name must be followed by a space
        assert!(parse("--print").is_err());
        assert!(parse("--printer x").is_err());
    }

    #[test]
    fn test_print_resolves_and_unescapes() {
        let console = MemoryConsole::new();
        let mut context = context(&console);
        context.variables_mut().insert("who".into(), "world".into());
        print(&mut context, PrintLevel::Plain, "hello ${{ who }} \\$HOME").unwrap();
        print(&mut context, PrintLevel::Info, "note").unwrap();
        print(&mut context, PrintLevel::Error, "bad").unwrap();
        assert_eq!(
            console.lines(),
            vec!["hello world $HOME", "@info note", "@error bad"]
        );
    }

    #[test]
    fn test_verify_checksum() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello").unwrap();
        let console = MemoryConsole::new();
        let mut context = context(&console);
        context
            .frame_mut()
            .unwrap()
            .set_working_directory(dir.path().display().to_string())
            .unwrap();

        let good = "--checksum hello.txt 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        verify_checksum(&mut context, good, true).unwrap();
        assert!(console.contains("@output checksum is valid"));

        let bad = format!("--checksum hello.txt {}", "1".repeat(64));
        let err = verify_checksum(&mut context, &bad, true).unwrap_err();
        assert_eq!(err.to_string(), "invalid checksum for file [hello.txt]");

        let err = verify_checksum(&mut context, "--checksum hello.txt", true).unwrap_err();
        assert!(matches!(err, EngineError::Syntax(_)));
    }

    #[test]
    fn test_extract_command_by_suffix() {
        let dir = Path::new("/tmp/x");
        assert_eq!(extract_command(Path::new("a.zip"), dir).unwrap().0, "unzip");
        let (program, args) = extract_command(Path::new("a.TAR.GZ"), dir).unwrap();
        assert_eq!(program, "tar");
        assert_eq!(args[0], OsString::from("-xzf"));
        assert_eq!(args[2], OsString::from("-C"));
        assert_eq!(
            extract_command(Path::new("a.tar.xz"), dir).unwrap().1[0],
            OsString::from("-xJf")
        );
        assert!(extract_command(Path::new("a.rar"), dir).is_err());
    }

    #[tokio::test]
    async fn test_run_extension_from_tarball() {
        let work = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        std::fs::write(
            source.path().join("run.sh"),
            "#!/bin/sh\necho \"extension ran\"\n",
        )
        .unwrap();
        let status = std::process::Command::new("tar")
            .arg("-czf")
            .arg(work.path().join("ext.tar.gz"))
            .arg("-C")
            .arg(source.path())
            .arg("run.sh")
            .status()
            .unwrap();
        assert!(status.success());

        let console = MemoryConsole::new();
        let mut context = context(&console);
        context
            .frame_mut()
            .unwrap()
            .set_working_directory(work.path().display().to_string())
            .unwrap();
        run_extension(&mut context, "--extension ext.tar.gz")
            .await
            .unwrap();
        assert_eq!(
            console.lines(),
            vec!["@command --extension ext.tar.gz", "@output extension ran"]
        );
    }

    #[tokio::test]
    async fn test_run_extension_missing_archive() {
        let console = MemoryConsole::new();
        let mut context = context(&console);
        let err = run_extension(&mut context, "--extension /nonexistent/ext.zip")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}

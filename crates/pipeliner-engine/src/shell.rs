//! Shell selection and process argument vectors.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::EngineError;

/// Splits a command into arguments, keeping quoted runs together.
static ARGUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]*)"|'([^']*)'|\S+"#).expect("argument pattern is valid")
});

/// Shells a command can run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Sh,
    Zsh,
    Fish,
    Ksh,
    Dash,
    /// Execute the command directly, without a shell.
    None,
}

impl Shell {
    /// All accepted shell names, `default` included.
    pub const NAMES: &'static [&'static str] =
        &["default", "bash", "sh", "zsh", "fish", "ksh", "dash", "none"];

    /// Build the argument vector that runs `command` under this shell.
    pub fn argv(self, command: &str) -> Vec<String> {
        let with = |args: &[&str]| -> Vec<String> {
            args.iter()
                .map(|a| a.to_string())
                .chain(std::iter::once(command.to_string()))
                .collect()
        };
        match self {
            Shell::Bash => with(&["bash", "--noprofile", "--norc", "-eo", "pipefail", "-c"]),
            Shell::Sh => with(&["sh", "-e", "-c"]),
            Shell::Zsh => with(&["zsh", "--no-rcs", "-o", "pipefail", "-c"]),
            Shell::Fish => with(&["fish", "--private", "-c"]),
            Shell::Ksh => vec![
                "ksh".to_string(),
                "-c".to_string(),
                format!("set -o pipefail; {}", command),
            ],
            Shell::Dash => with(&["dash", "-e", "-c"]),
            Shell::None => split_arguments(command),
        }
    }
}

impl FromStr for Shell {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "default" | "bash" => Ok(Shell::Bash),
            "sh" => Ok(Shell::Sh),
            "zsh" => Ok(Shell::Zsh),
            "fish" => Ok(Shell::Fish),
            "ksh" => Ok(Shell::Ksh),
            "dash" => Ok(Shell::Dash),
            "none" => Ok(Shell::None),
            other => Err(EngineError::Configuration(format!(
                "invalid shell [{}]",
                other
            ))),
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shell::Bash => "bash",
            Shell::Sh => "sh",
            Shell::Zsh => "zsh",
            Shell::Fish => "fish",
            Shell::Ksh => "ksh",
            Shell::Dash => "dash",
            Shell::None => "none",
        };
        f.write_str(name)
    }
}

/// Split a command line on whitespace, honouring single and double quotes.
pub fn split_arguments(command: &str) -> Vec<String> {
    ARGUMENT
        .captures_iter(command)
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

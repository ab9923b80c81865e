//! Pipeliner - run YAML-defined pipelines of shell commands
//!
//! Main entry point for the pipeliner CLI.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use pipeliner_config::{Discovery, LoggingConfig, PipelinerConfig};
use pipeliner_engine::lexer::is_environment_variable_name;
use pipeliner_engine::variable::{canonical_key, is_scoped_identifier};
use pipeliner_engine::{Context, Engine, PIPELINER_TMP, Resolver, StdConsole, Variables, ipc};
use tracing::{debug, warn};
use tracing_appender::non_blocking::WorkerGuard;

mod properties;

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Pipeliner - run YAML-defined pipelines of shell commands
#[derive(Parser, Debug)]
#[command(name = "pipeliner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Pipeline files to execute, in order
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Prefix output lines with a timestamp
    #[arg(long)]
    pub timestamps: bool,

    /// Only print command lines and errors
    #[arg(long)]
    pub minimal: bool,

    /// Enable trace logging on stderr
    #[arg(long)]
    pub trace: bool,

    /// Validate pipeline files without running them
    #[arg(long)]
    pub validate: bool,

    /// Set an environment variable
    #[arg(short = 'E', long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Set a pipeline variable
    #[arg(short = 'P', long = "with", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub with: Vec<(String, String)>,

    /// Read pipeline variables from a properties file
    #[arg(long, value_name = "FILE")]
    pub with_file: Vec<PathBuf>,

    /// Directory holding config.toml
    #[arg(long, env = "PIPELINER_CONFIG_DIR", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got [{}]", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in [{}]", s));
    }
    Ok((key.to_string(), value.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut discovery = Discovery::new();
    if let Some(dir) = &cli.config_dir {
        discovery = discovery.with_user_dir(dir);
    }
    let loaded = discovery.load();
    let guard = init_tracing(cli.trace, &loaded.config.logging());
    for warning in &loaded.warnings {
        warn!("{}", warning);
    }
    debug!(sources = ?loaded.loaded_from(), "configuration loaded");

    let code = match run(cli, loaded.config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("@error {:#}", e);
            1
        }
    };

    ipc::sweep();
    drop(guard);
    std::process::exit(code);
}

/// Console layer on stderr, plus a daily JSON file layer when a log directory is configured.
fn init_tracing(trace: bool, logging: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = if trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let (file_layer, guard) = match &logging.directory {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "pipeliner.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(EnvFilter::new(
                    "pipeliner=trace,pipeliner_engine=trace,pipeliner_config=trace,info",
                ));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(filter),
        )
        .with(file_layer)
        .init();

    guard
}

/// Build the context and run each file; the first non-zero code stops the run.
async fn run(cli: Cli, config: PipelinerConfig) -> Result<i32> {
    let console_config = config.console();
    let engine_config = config.engine();

    let console = StdConsole::new()
        .with_timestamps(cli.timestamps || console_config.timestamps)
        .with_minimal(cli.minimal || console_config.minimal);
    let resolver = Resolver::new(engine_config.token_cache_capacity);

    // Later sources win: config, then --with-file in order, then -P
    let mut sources: Vec<(String, String)> = engine_config.variables.into_iter().collect();
    for path in &cli.with_file {
        sources.extend(properties::read(path)?);
    }
    sources.extend(cli.with);
    let mut variables = Variables::new();
    for (name, value) in sources {
        if !is_scoped_identifier(&name) {
            bail!("invalid variable name [{}]", name);
        }
        variables.insert(canonical_key(&name), value);
    }
    let variables = resolver.resolve_variables(&variables)?;

    let mut environment: Variables = std::env::vars().collect();
    if let Some(tmp) = &engine_config.tmp_dir {
        environment.insert(PIPELINER_TMP.to_string(), tmp.display().to_string());
    }

    let mut context = Context::new(Box::new(console))
        .with_resolver(resolver)
        .with_environment(environment)
        .with_variables(variables);

    // Declared like a pipeline `env:` block so entries may reference each other
    let mut extra = engine_config.env;
    extra.extend(cli.env);
    for (name, value) in &extra {
        if !is_environment_variable_name(name) {
            bail!("invalid environment variable name [{}]", name);
        }
        context.set_environment_variable(name, value);
    }
    let mut engine = Engine::new(context);

    for file in &cli.files {
        debug!(file = %file.display(), validate = cli.validate, "processing file");
        let code = if cli.validate {
            engine.validate_file(file)
        } else {
            engine.execute_file(file).await
        };
        if code != 0 {
            return Ok(code);
        }
    }

    Ok(0)
}

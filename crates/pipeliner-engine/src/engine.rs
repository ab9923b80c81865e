//! Top-level driver: load, validate, generate, interpret, report.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::generator;
use crate::interpreter::{self, Outcome};
use crate::model::{self, Pipeline};
use crate::validate::validate;

/// Environment variable carrying the engine version.
pub const PIPELINER_VERSION: &str = "PIPELINER_VERSION";

/// Environment variable carrying the scratch directory.
pub const PIPELINER_TMP: &str = "PIPELINER_TMP";

/// Engine version exported to commands.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs pipeline documents against one context.
///
/// Frames, variables and environment variables persist across runs, so a
/// sequence of files behaves like a single session.
#[derive(Debug)]
pub struct Engine {
    context: Context,
}

impl Engine {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub fn into_context(self) -> Context {
        self.context
    }

    /// Execute a pipeline file, returning the process exit code.
    pub async fn execute_file(&mut self, path: &Path) -> i32 {
        run_file(&mut self.context, path).await
    }

    /// Execute an already loaded pipeline, returning the process exit code.
    pub async fn execute_pipeline(&mut self, pipeline: &Pipeline) -> i32 {
        seed_environment(&mut self.context);
        if !check(&mut self.context, pipeline) {
            return 1;
        }
        run_pipeline(&mut self.context, pipeline).await
    }

    /// Load and validate a pipeline file without running it.
    pub fn validate_file(&mut self, path: &Path) -> i32 {
        match load(&mut self.context, path) {
            Some(_) => 0,
            None => 1,
        }
    }
}

/// Boxed so `--pipeline` can recurse through the interpreter.
pub(crate) fn run_file<'a>(
    context: &'a mut Context,
    path: &'a Path,
) -> Pin<Box<dyn Future<Output = i32> + Send + 'a>> {
    Box::pin(async move {
        info!(path = %path.display(), "executing pipeline file");
        seed_environment(context);
        match load(context, path) {
            Some(pipeline) => run_pipeline(context, &pipeline).await,
            None => 1,
        }
    })
}

fn seed_environment(context: &mut Context) {
    let environment = context.environment_mut();
    environment.insert(PIPELINER_VERSION.into(), VERSION.into());
    environment
        .entry(PIPELINER_TMP.into())
        .or_insert_with(|| std::env::temp_dir().display().to_string());
}

/// Load and validate, printing problems. `None` if the file is unusable.
fn load(context: &mut Context, path: &Path) -> Option<Pipeline> {
    match model::load_file(path) {
        Ok(pipeline) => check(context, &pipeline).then_some(pipeline),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to load pipeline");
            context.console().error(&err.to_string());
            None
        }
    }
}

fn check(context: &mut Context, pipeline: &Pipeline) -> bool {
    let errors = validate(pipeline);
    for error in &errors {
        context.console().error(&error.to_string());
    }
    if !errors.is_empty() {
        debug!(errors = errors.len(), "pipeline failed validation");
    }
    errors.is_empty()
}

async fn run_pipeline(context: &mut Context, pipeline: &Pipeline) -> i32 {
    let instructions = match generator::generate(pipeline) {
        Ok(instructions) => instructions,
        Err(err) => {
            context.console().error(&err.to_string());
            return 1;
        }
    };

    let base = context.depth();
    let code = match interpreter::run(context, instructions).await {
        Ok(Outcome::Completed) => 0,
        Ok(Outcome::Exit(code)) => {
            summarize(context, base, code == 0);
            code
        }
        Err(err) => {
            warn!(error = %err, source = ?err.root(), "pipeline failed");
            let line = match context.frames().get(base..).and_then(<[_]>::last) {
                Some(frame) => format!("{} -> {}", frame, err),
                None => err.to_string(),
            };
            context.console().error(&line);
            summarize(context, base, false);
            1
        }
    };

    context.truncate_frames(base);
    debug!(code, "pipeline finished");
    code
}

/// Print `<frame> status=[..] ms=[..]` for each frame above `base`, innermost first.
fn summarize(context: &mut Context, base: usize, success: bool) {
    let lines: Vec<String> = context
        .frames()
        .get(base..)
        .unwrap_or_default()
        .iter()
        .rev()
        .map(|frame| {
            let status = if success { "success" } else { "failure" };
            format!("{} status=[{}] ms=[{}]", frame, status, frame.elapsed_millis())
        })
        .collect();

    for line in lines {
        if success {
            context.console().println(&line);
        } else {
            context.console().error(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::MemoryConsole;
    use crate::model::from_yaml_str;

    fn engine(console: &MemoryConsole) -> Engine {
        Engine::new(Context::new(Box::new(console.clone())))
    }

    #[tokio::test]
    async fn test_seeds_version_and_tmp() {
        let console = MemoryConsole::new();
        let mut engine = engine(&console);
        engine
            .context_mut()
            .environment_mut()
            .insert(PIPELINER_TMP.into(), "/scratch".into());
        let pipeline = from_yaml_str("pipeline:\n  jobs:\n    - steps:\n        - run: --print hi\n").unwrap();

        assert_eq!(engine.execute_pipeline(&pipeline).await, 0);
        assert_eq!(engine.context().environment()[PIPELINER_VERSION], VERSION);
        assert_eq!(engine.context().environment()[PIPELINER_TMP], "/scratch");
    }

    #[tokio::test]
    async fn test_exit_summaries_innermost_first() {
        let console = MemoryConsole::new();
        let mut engine = engine(&console);
        let yaml = r#"
pipeline:
  name: p
  jobs:
    - name: j
      steps:
        - name: s
          run: exit 3
"#;
        let code = engine
            .execute_pipeline(&from_yaml_str(yaml).unwrap())
            .await;
        assert_eq!(code, 3);
        assert_eq!(engine.context().depth(), 0);

        let summaries: Vec<String> = console
            .lines()
            .into_iter()
            .filter(|l| l.contains("ms=["))
            .collect();
        assert_eq!(summaries.len(), 3);
        assert!(summaries[0].starts_with("@error @step name=[s] status=[failure]"));
        assert!(summaries[2].starts_with("@error @pipeline name=[p] status=[failure]"));
    }

    #[tokio::test]
    async fn test_exit_zero_reports_success() {
        let console = MemoryConsole::new();
        let mut engine = engine(&console);
        let yaml = "pipeline:\n  jobs:\n    - steps:\n        - run: exit 0\n";
        let code = engine
            .execute_pipeline(&from_yaml_str(yaml).unwrap())
            .await;
        assert_eq!(code, 0);
        assert!(console.contains("@step status=[success] ms=["));
    }

    #[tokio::test]
    async fn test_validation_errors_skip_execution() {
        let console = MemoryConsole::new();
        let mut engine = engine(&console);
        let yaml = "pipeline:\n  jobs:\n    - steps:\n        - run: \"\"\n";
        let code = engine
            .execute_pipeline(&from_yaml_str(yaml).unwrap())
            .await;
        assert_eq!(code, 1);
        assert_eq!(console.lines(), vec!["@error @step -> run is empty"]);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let console = MemoryConsole::new();
        let mut engine = engine(&console);
        let code = engine
            .execute_file(Path::new("/nonexistent/pipeline.yaml"))
            .await;
        assert_eq!(code, 1);
        assert!(console.contains("@error failed to load pipeline [/nonexistent/pipeline.yaml]"));
    }
}

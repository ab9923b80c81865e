//! Mutable run-time state threaded through instruction execution.

use std::collections::BTreeSet;

use crate::console::Console;
use crate::error::{EngineError, Result};
use crate::frame::Frame;
use crate::resolver::{Resolver, Variables};
use crate::variable::canonical_key;

/// Working directory used when no frame sets one.
pub const DEFAULT_WORKING_DIRECTORY: &str = ".";

/// Shell used when no frame sets one, and the meaning of `default`.
pub const DEFAULT_SHELL: &str = "bash";

/// Timeout used when no frame sets one.
pub const DEFAULT_TIMEOUT_MINUTES: &str = "360";

/// Environment variables, variables, and the frame stack of one run.
pub struct Context {
    console: Box<dyn Console>,
    resolver: Resolver,
    environment: Variables,
    /// Environment entries set by the pipeline, stored unresolved.
    declared: BTreeSet<String>,
    variables: Variables,
    /// Outermost frame first.
    frames: Vec<Frame>,
}

impl Context {
    pub fn new(console: Box<dyn Console>) -> Self {
        Self {
            console,
            resolver: Resolver::default(),
            environment: Variables::new(),
            declared: BTreeSet::new(),
            variables: Variables::new(),
            frames: Vec::new(),
        }
    }

    /// Replace the resolver, e.g. to change the token cache capacity.
    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_environment(mut self, environment: Variables) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables
            .into_iter()
            .map(|(key, value)| (canonical_key(&key), value))
            .collect();
        self
    }

    pub fn console(&mut self) -> &mut dyn Console {
        self.console.as_mut()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn environment(&self) -> &Variables {
        &self.environment
    }

    pub fn environment_mut(&mut self) -> &mut Variables {
        &mut self.environment
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    // ─────────────────────────────────────────────────────────────────────
    // Frames
    // ─────────────────────────────────────────────────────────────────────

    pub fn push_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Result<Frame> {
        self.frames
            .pop()
            .ok_or_else(|| EngineError::Configuration("frame stack is empty".into()))
    }

    /// The innermost frame.
    pub fn frame(&self) -> Result<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| EngineError::Configuration("frame stack is empty".into()))
    }

    pub fn frame_mut(&mut self) -> Result<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| EngineError::Configuration("frame stack is empty".into()))
    }

    /// Active frames, outermost first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Drop frames above `depth`.
    pub fn truncate_frames(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Effective overrides
    // ─────────────────────────────────────────────────────────────────────
    //
    // Each getter scans from the outermost frame inward and takes the first
    // frame with the field set, so an enclosing override shadows an inner one.

    pub fn working_directory(&self) -> Result<String> {
        let raw = self
            .frames
            .iter()
            .find_map(Frame::working_directory)
            .unwrap_or(DEFAULT_WORKING_DIRECTORY);
        self.resolve_all_variables(raw)
    }

    pub fn shell(&self) -> Result<String> {
        let raw = self
            .frames
            .iter()
            .find_map(Frame::shell)
            .unwrap_or(DEFAULT_SHELL);
        let shell = self.resolve_all_variables(raw)?;
        if shell == "default" {
            Ok(DEFAULT_SHELL.to_string())
        } else {
            Ok(shell)
        }
    }

    pub fn timeout_minutes(&self) -> Result<String> {
        let raw = self
            .frames
            .iter()
            .find_map(Frame::timeout_minutes)
            .unwrap_or(DEFAULT_TIMEOUT_MINUTES);
        self.resolve_all_variables(raw)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────

    /// Substitute `${{ }}` references, leaving environment references for the shell.
    pub fn resolve_variables(&self, input: &str) -> Result<String> {
        self.resolver
            .resolve_variables_repeatedly(&self.variables, input)
    }

    /// Substitute both environment and pipeline variables; nothing may remain.
    pub fn resolve_all_variables(&self, input: &str) -> Result<String> {
        self.resolver
            .resolve_all_variables(&self.environment, &self.variables, input)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Environment
    // ─────────────────────────────────────────────────────────────────────

    /// Declare an environment variable whose value is resolved per command.
    ///
    /// References to `name` itself are expanded against its current value
    /// (empty when unset) straight away, so `PATH: /opt/bin:$PATH` extends
    /// the existing path. Every other reference is kept until
    /// [`command_environment`](Self::command_environment).
    pub fn set_environment_variable(&mut self, name: &str, value: &str) {
        let previous = self.environment.get(name).map(String::as_str).unwrap_or_default();
        let value = self
            .resolver
            .substitute_environment_variable(name, previous, value);
        self.environment.insert(name.to_string(), value);
        self.declared.insert(name.to_string());
    }

    pub fn remove_environment_variable(&mut self, name: &str) {
        self.environment.remove(name);
        self.declared.remove(name);
    }

    /// Environment handed to a child process.
    ///
    /// Declared entries are resolved against the whole environment and the
    /// variables, so entries of one node may reference each other in any
    /// order. Inherited entries are passed through untouched.
    pub fn command_environment(&self) -> Result<Variables> {
        let mut environment = self.environment.clone();
        for name in &self.declared {
            if let Some(raw) = self.environment.get(name) {
                let value = self.resolver.resolve_all_variables(
                    &self.environment,
                    &self.variables,
                    raw,
                )?;
                environment.insert(name.clone(), value);
            }
        }
        Ok(environment)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Variables
    // ─────────────────────────────────────────────────────────────────────

    /// Set a variable under its canonical key.
    pub fn set_variable(&mut self, name: &str, value: &str) {
        self.variables.insert(canonical_key(name), value.to_string());
    }

    pub fn remove_variable(&mut self, name: &str) {
        self.variables.remove(&canonical_key(name));
    }

    /// Keys a value named `name` is published under.
    ///
    /// Always includes `name`, then prefixes it with the ids of the innermost
    /// frames, stopping at the first frame without an id. For frames `p`,
    /// `j`, `s`: `name`, `s.name`, `j.s.name`, `p.j.s.name`.
    pub fn scoped_keys(&self, name: &str) -> Vec<String> {
        let name = canonical_key(name);
        let mut keys = vec![name.clone()];
        let mut key = name;
        for frame in self.frames.iter().rev() {
            let Some(id) = frame.id() else {
                break;
            };
            key = format!("{}.{}", canonical_key(id), key);
            keys.push(key.clone());
        }
        keys
    }

    /// Set a variable under every scope of the current frame chain.
    pub fn set_scoped_variable(&mut self, name: &str, value: &str) {
        for key in self.scoped_keys(name) {
            self.variables.insert(key, value.to_string());
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("environment", &self.environment.len())
            .field("variables", &self.variables)
            .field("frames", &self.frames)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::MemoryConsole;
    use crate::frame::FrameKind;

    fn context() -> Context {
        Context::new(Box::new(MemoryConsole::new()))
    }

    fn frame(kind: FrameKind, id: &str) -> Frame {
        Frame::new(kind).with_id(Some(id.to_string()))
    }

    #[test]
    fn test_defaults_without_frames() {
        let ctx = context();
        assert_eq!(ctx.working_directory().unwrap(), ".");
        assert_eq!(ctx.shell().unwrap(), "bash");
        assert_eq!(ctx.timeout_minutes().unwrap(), "360");
    }

    #[test]
    fn test_outer_frame_override_wins() {
        let mut ctx = context();
        let mut pipeline = frame(FrameKind::Pipeline, "p");
        pipeline.set_working_directory("/outer").unwrap();
        ctx.push_frame(pipeline);
        let mut step = frame(FrameKind::Step, "s");
        step.set_working_directory("/inner").unwrap();
        ctx.push_frame(step);

        assert_eq!(ctx.working_directory().unwrap(), "/outer");
    }

    #[test]
    fn test_inner_override_used_when_outer_unset() {
        let mut ctx = context();
        ctx.push_frame(frame(FrameKind::Pipeline, "p"));
        let mut step = frame(FrameKind::Step, "s");
        step.set_timeout_minutes("5").unwrap();
        ctx.push_frame(step);

        assert_eq!(ctx.timeout_minutes().unwrap(), "5");
    }

    #[test]
    fn test_shell_default_maps_to_bash() {
        let mut ctx = context();
        let mut pipeline = frame(FrameKind::Pipeline, "p");
        pipeline.set_shell("${{ sh }}").unwrap();
        ctx.push_frame(pipeline);
        ctx.variables_mut().insert("sh".into(), "default".into());

        assert_eq!(ctx.shell().unwrap(), "bash");
    }

    #[test]
    fn test_working_directory_resolves_environment() {
        let mut ctx = context();
        ctx.environment_mut().insert("BASE".into(), "/srv".into());
        let mut pipeline = frame(FrameKind::Pipeline, "p");
        pipeline.set_working_directory("$BASE/app").unwrap();
        ctx.push_frame(pipeline);

        assert_eq!(ctx.working_directory().unwrap(), "/srv/app");
    }

    #[test]
    fn test_scoped_fan_out() {
        let mut ctx = context();
        ctx.push_frame(frame(FrameKind::Pipeline, "P"));
        ctx.push_frame(frame(FrameKind::Job, "J"));
        ctx.push_frame(frame(FrameKind::Step, "S"));

        ctx.set_scoped_variable("v", "out");

        for key in ["v", "s.v", "j.s.v", "p.j.s.v"] {
            assert_eq!(ctx.variables().get(key).map(String::as_str), Some("out"));
        }
        let resolved = ctx.resolve_variables("${{ P.J.S.V }} ${{ s.V }}").unwrap();
        assert_eq!(resolved, "out out");
    }

    #[test]
    fn test_variable_keys_are_case_insensitive() {
        let mut ctx = context();
        ctx.set_variable("Foo", "bar");
        assert_eq!(ctx.variables()["foo"], "bar");
        assert_eq!(ctx.resolve_variables("${{ FOO }}/${{ foo }}").unwrap(), "bar/bar");
        ctx.remove_variable("FOO");
        assert!(ctx.variables().is_empty());

        let ctx = context().with_variables(Variables::from([("Mixed".to_string(), "x".to_string())]));
        assert_eq!(ctx.resolve_variables("${{ mixed }}").unwrap(), "x");
    }

    #[test]
    fn test_declared_environment_resolves_in_any_order() {
        let mut ctx = context();
        ctx.set_environment_variable("A", "$Z/x");
        ctx.set_environment_variable("Z", "/z");
        let env = ctx.command_environment().unwrap();
        assert_eq!(env["A"], "/z/x");
        assert_eq!(env["Z"], "/z");
    }

    #[test]
    fn test_declared_environment_extends_itself() {
        let mut ctx = context().with_environment(Variables::from([
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("PROMPT".to_string(), "$HOST> ".to_string()),
        ]));
        ctx.set_environment_variable("PATH", "/opt/${{ tool }}/bin:$PATH");
        ctx.set_variable("tool", "t");
        let env = ctx.command_environment().unwrap();
        assert_eq!(env["PATH"], "/opt/t/bin:/usr/bin");
        // Inherited values are never rewritten
        assert_eq!(env["PROMPT"], "$HOST> ");

        ctx.remove_environment_variable("PATH");
        assert!(!ctx.command_environment().unwrap().contains_key("PATH"));
    }

    #[test]
    fn test_unset_environment_reference_is_empty() {
        let mut ctx = context();
        let mut pipeline = frame(FrameKind::Pipeline, "p");
        pipeline.set_working_directory("/srv$UNSET_SUFFIX").unwrap();
        ctx.push_frame(pipeline);
        ctx.set_environment_variable("OUT", "${UNSET_DIR}/out");
        ctx.set_environment_variable("LIST", "$LIST:/a");

        assert_eq!(ctx.working_directory().unwrap(), "/srv");
        let env = ctx.command_environment().unwrap();
        assert_eq!(env["OUT"], "/out");
        assert_eq!(env["LIST"], ":/a");
    }

    #[test]
    fn test_scoped_fan_out_stops_at_missing_id() {
        let mut ctx = context();
        ctx.push_frame(frame(FrameKind::Pipeline, "P"));
        ctx.push_frame(Frame::new(FrameKind::Job));
        ctx.push_frame(frame(FrameKind::Step, "S"));

        assert_eq!(ctx.scoped_keys("v"), vec!["v", "S.v"]);
    }

    #[test]
    fn test_pop_empty_stack_fails() {
        let mut ctx = context();
        assert!(ctx.pop_frame().is_err());
        assert!(ctx.frame().is_err());
    }
}

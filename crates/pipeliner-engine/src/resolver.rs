//! Fixed-point substitution of variables and environment variables.
//!
//! Every operation is built on a single substitution pass that re-lexes the
//! current string. Passes repeat until the output stops changing or
//! [`MAX_PASSES`] is reached; whatever survives is then checked, and any
//! remaining reference is reported as unresolved.
//!
//! Substitution rules:
//!
//! - `${{ name }}` absent from the variable map becomes the empty string
//! - `${{ required:name }}` absent from the variable map is an error
//! - `$NAME` / `${NAME}` absent from the environment map becomes the empty string

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::{EngineError, Result};
use crate::lexer::{Token, TokenCache, TokenKind};
use crate::variable;

/// String-to-string map used for both variables and environment variables.
pub type Variables = BTreeMap<String, String>;

/// Upper bound on substitution passes for a single value.
pub const MAX_PASSES: usize = 10;

/// Resolves `${{ }}` and `$ENV` references, backed by a token cache.
#[derive(Debug, Default)]
pub struct Resolver {
    cache: TokenCache,
}

impl Resolver {
    /// Create a resolver whose token cache holds `capacity` inputs.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: TokenCache::new(capacity),
        }
    }

    fn tokens(&self, input: &str) -> Arc<Vec<Token>> {
        self.cache.tokenize(input)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Public operations
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve every entry of a variable map against the map itself.
    pub fn resolve_variables(&self, variables: &Variables) -> Result<Variables> {
        let mut resolved = Variables::new();
        for (key, value) in variables {
            let value = self.fixed_point(value, |current| {
                self.substitute_variables(variables, current)
            })?;
            self.ensure_no_variables(&value)?;
            resolved.insert(key.clone(), value);
        }
        Ok(resolved)
    }

    /// Substitute an already-resolved variable map into `input` (single pass).
    pub fn resolve_variables_in(&self, variables: &Variables, input: &str) -> Result<String> {
        self.substitute_variables(variables, input)
    }

    /// Resolve every environment entry against both maps.
    ///
    /// Entries may reference other environment entries and pipeline
    /// variables in either direction, in any order. A `${{ }}` reference left
    /// after convergence is an error.
    pub fn resolve_environment_variables(
        &self,
        environment: &Variables,
        variables: &Variables,
    ) -> Result<Variables> {
        let mut resolved = Variables::new();
        for (key, value) in environment {
            let value = self.resolve_all_variables(environment, variables, value)?;
            resolved.insert(key.clone(), value);
        }
        Ok(resolved)
    }

    /// Resolve both environment variables and variables in `input`.
    ///
    /// Alternates an environment pass and a variable pass until a full cycle
    /// leaves the string unchanged.
    pub fn resolve_all_variables(
        &self,
        environment: &Variables,
        variables: &Variables,
        input: &str,
    ) -> Result<String> {
        let resolved = self.fixed_point(input, |current| {
            let current = self.substitute_environment(environment, current);
            self.substitute_variables(variables, &current)
        })?;
        self.ensure_no_variables(&resolved)?;
        Ok(resolved)
    }

    /// Replace references to the single environment variable `name` in
    /// `input`, leaving every other reference untouched.
    pub fn substitute_environment_variable(&self, name: &str, value: &str, input: &str) -> String {
        let tokens = self.tokens(input);
        let mut out = String::with_capacity(input.len());
        for token in tokens.iter() {
            if token.kind == TokenKind::EnvironmentVariable && token.value() == name {
                out.push_str(value);
            } else {
                out.push_str(&token.text);
            }
        }
        out
    }

    /// Repeat variable substitution on `input` until it stops changing.
    ///
    /// Environment references are left for the shell. Unlike
    /// [`resolve_all_variables`](Self::resolve_all_variables), a reference
    /// surviving the pass limit is not an error.
    pub fn resolve_variables_repeatedly(&self, variables: &Variables, input: &str) -> Result<String> {
        self.fixed_point(input, |current| self.substitute_variables(variables, current))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Passes
    // ─────────────────────────────────────────────────────────────────────

    fn fixed_point<F>(&self, input: &str, mut pass: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<String>,
    {
        let mut current = input.to_string();
        for iteration in 0..MAX_PASSES {
            let next = pass(&current)?;
            if next == current {
                trace!(iteration, "resolution converged");
                return Ok(next);
            }
            current = next;
        }
        trace!(input, "resolution pass limit reached");
        Ok(current)
    }

    fn substitute_variables(&self, variables: &Variables, input: &str) -> Result<String> {
        let tokens = self.tokens(input);
        let mut out = String::with_capacity(input.len());
        for token in tokens.iter() {
            match token.kind {
                TokenKind::Variable => {
                    let parsed = variable::parse(token.value())?;
                    match variables.get(&parsed.scoped_key()) {
                        Some(value) => out.push_str(value),
                        None if parsed.is_required() => {
                            return Err(EngineError::Unresolved(format!(
                                "unresolved required variable [{}]",
                                token.text
                            )));
                        }
                        None => {}
                    }
                }
                _ => out.push_str(&token.text),
            }
        }
        Ok(out)
    }

    fn substitute_environment(&self, environment: &Variables, input: &str) -> String {
        let tokens = self.tokens(input);
        let mut out = String::with_capacity(input.len());
        for token in tokens.iter() {
            match token.kind {
                TokenKind::EnvironmentVariable => {
                    if let Some(value) = environment.get(token.value()) {
                        out.push_str(value);
                    }
                }
                _ => out.push_str(&token.text),
            }
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────
    // Post-convergence checks
    // ─────────────────────────────────────────────────────────────────────

    fn ensure_no_variables(&self, value: &str) -> Result<()> {
        for token in self.tokens(value).iter() {
            if token.kind == TokenKind::Variable {
                return Err(unresolved_variable(token)?);
            }
        }
        Ok(())
    }

}

fn unresolved_variable(token: &Token) -> Result<EngineError> {
    let parsed = variable::parse(token.value())?;
    let kind = if parsed.is_scoped() {
        "scoped variable"
    } else {
        "variable"
    };
    Ok(EngineError::Unresolved(format!(
        "unresolved {} [{}]",
        kind, token.text
    )))
}

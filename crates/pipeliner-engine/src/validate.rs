//! Structural validation of a loaded pipeline.

use std::collections::HashSet;
use std::fmt;

use crate::lexer::is_environment_variable_name;
use crate::model::{label, NodeKind, NodeSettings, Pipeline};
use crate::shell::Shell;
use crate::variable::{is_identifier, is_scoped_identifier};

/// Longest accepted variable or environment variable name.
pub const MAX_NAME_LENGTH: usize = 64;

/// Largest accepted `timeout-minutes`.
pub const MAX_TIMEOUT_MINUTES: u32 = 4320;

/// A problem found in one node of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Console label of the offending node.
    pub node: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.node, self.message)
    }
}

/// Validate a pipeline tree, returning every problem found.
pub fn validate(pipeline: &Pipeline) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_node(NodeKind::Pipeline, &pipeline.settings, &mut errors);
    if pipeline.jobs.is_empty() {
        push(&mut errors, NodeKind::Pipeline, &pipeline.settings, "no jobs defined");
    }
    validate_unique_ids(
        NodeKind::Job,
        pipeline.jobs.iter().map(|j| &j.settings),
        &mut errors,
    );

    for job in &pipeline.jobs {
        validate_node(NodeKind::Job, &job.settings, &mut errors);
        if job.steps.is_empty() {
            push(&mut errors, NodeKind::Job, &job.settings, "no steps defined");
        }
        validate_unique_ids(
            NodeKind::Step,
            job.steps.iter().map(|s| &s.settings),
            &mut errors,
        );

        for step in &job.steps {
            validate_node(NodeKind::Step, &step.settings, &mut errors);
            if step.run.trim().is_empty() {
                push(&mut errors, NodeKind::Step, &step.settings, "run is empty");
            }
        }
    }

    errors
}

fn push(errors: &mut Vec<ValidationError>, kind: NodeKind, settings: &NodeSettings, message: impl Into<String>) {
    errors.push(ValidationError {
        node: label(kind, settings),
        message: message.into(),
    });
}

fn validate_node(kind: NodeKind, settings: &NodeSettings, errors: &mut Vec<ValidationError>) {
    if let Some(id) = &settings.id
        && !is_identifier(id)
    {
        push(errors, kind, settings, format!("invalid id [{}]", id));
    }

    if settings.enabled().is_none() {
        let value = settings.enabled.as_deref().unwrap_or_default();
        push(errors, kind, settings, format!("invalid enabled value [{}]", value));
    }

    if let Some(conditional) = &settings.conditional
        && conditional.trim().is_empty()
    {
        push(errors, kind, settings, "if is empty");
    }

    if let Some(dir) = &settings.working_directory
        && dir.trim().is_empty()
    {
        push(errors, kind, settings, "working-directory is empty");
    }

    // Values containing references are checked at run time
    if let Some(shell) = &settings.shell
        && !shell.contains('$')
        && shell.parse::<Shell>().is_err()
    {
        push(errors, kind, settings, format!("invalid shell [{}]", shell));
    }

    if let Some(timeout) = &settings.timeout_minutes
        && !timeout.contains('$')
    {
        match timeout.trim().parse::<u32>() {
            Ok(minutes) if (1..=MAX_TIMEOUT_MINUTES).contains(&minutes) => {}
            _ => push(
                errors,
                kind,
                settings,
                format!("invalid timeout-minutes [{}]", timeout),
            ),
        }
    }

    for name in settings.env.keys() {
        if !is_environment_variable_name(name) {
            push(errors, kind, settings, format!("invalid environment variable name [{}]", name));
        } else if name.len() > MAX_NAME_LENGTH {
            push(
                errors,
                kind,
                settings,
                format!(
                    "environment variable name [{}] exceeds maximum length of {} characters",
                    name, MAX_NAME_LENGTH
                ),
            );
        }
    }

    for name in settings.variables.keys() {
        if !is_scoped_identifier(name) {
            push(errors, kind, settings, format!("invalid variable name [{}]", name));
        } else if name.len() > MAX_NAME_LENGTH {
            push(
                errors,
                kind,
                settings,
                format!(
                    "variable name [{}] exceeds maximum length of {} characters",
                    name, MAX_NAME_LENGTH
                ),
            );
        }
    }
}

fn validate_unique_ids<'a>(
    kind: NodeKind,
    siblings: impl Iterator<Item = &'a NodeSettings>,
    errors: &mut Vec<ValidationError>,
) {
    let mut seen = HashSet::new();
    for settings in siblings {
        if let Some(id) = &settings.id
            && !seen.insert(id.as_str())
        {
            push(errors, kind, settings, format!("duplicate id [{}]", id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::from_yaml_str;

    fn errors(yaml: &str) -> Vec<String> {
        validate(&from_yaml_str(yaml).unwrap())
            .into_iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn test_valid_pipeline() {
        let yaml = r#"
pipeline:
  id: p
  jobs:
    - id: j
      steps:
        - id: s
          shell: zsh
          timeout-minutes: 5
          run: echo ok
"#;
        assert!(errors(yaml).is_empty());
    }

    #[test]
    fn test_reports_each_problem() {
        let yaml = r#"
pipeline:
  id: -bad
  env:
    1X: nope
  with:
    "bad name": x
  jobs:
    - steps:
        - shell: powershell
          enabled: sometimes
          timeout-minutes: 0
          run: "  "
"#;
        let errors = errors(yaml);
        assert!(errors.contains(&"@pipeline id=[-bad] -> invalid id [-bad]".to_string()));
        assert!(errors.iter().any(|e| e.contains("invalid environment variable name [1X]")));
        assert!(errors.iter().any(|e| e.contains("invalid variable name [bad name]")));
        assert!(errors.iter().any(|e| e == "@step -> invalid shell [powershell]"));
        assert!(errors.iter().any(|e| e.contains("invalid enabled value [sometimes]")));
        assert!(errors.iter().any(|e| e.contains("invalid timeout-minutes [0]")));
        assert!(errors.iter().any(|e| e == "@step -> run is empty"));
    }

    #[test]
    fn test_empty_tree() {
        let errors = errors("pipeline:\n  name: empty\n");
        assert_eq!(errors, vec!["@pipeline name=[empty] -> no jobs defined"]);
    }

    #[test]
    fn test_duplicate_sibling_ids() {
        let yaml = r#"
pipeline:
  jobs:
    - id: j
      steps:
        - id: s
          run: a
        - id: s
          run: b
"#;
        assert_eq!(errors(yaml), vec!["@step id=[s] -> duplicate id [s]"]);
    }

    #[test]
    fn test_templated_values_deferred() {
        let yaml = r#"
pipeline:
  shell: ${{ shell }}
  timeout-minutes: ${{ minutes }}
  jobs:
    - steps:
        - run: echo
"#;
        assert!(errors(yaml).is_empty());
    }
}

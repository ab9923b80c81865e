//! Pipeline document model.
//!
//! A document has a single top-level `pipeline:` key:
//!
//! ```yaml
//! pipeline:
//!   name: Example
//!   env:
//!     GREETING: hello
//!   jobs:
//!     - name: Build
//!       id: build
//!       steps:
//!         - name: Say hello
//!           id: hello
//!           with:
//!             who: world
//!           run: |
//!             echo "$GREETING ${{ who }}"
//! ```
//!
//! Every node accepts `id`, `name`, `description`, `enabled`, `if`,
//! `working-directory`, `shell`, `timeout-minutes`, `env` and `with`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::resolver::Variables;

/// Settings shared by pipelines, jobs, and steps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeSettings {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// `true` or `false`, case-insensitive. Absent means enabled.
    #[serde(default, deserialize_with = "scalar")]
    pub enabled: Option<String>,
    #[serde(rename = "if")]
    pub conditional: Option<String>,
    pub working_directory: Option<String>,
    pub shell: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    pub timeout_minutes: Option<String>,
    /// Environment variables.
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: Variables,
    /// Pipeline variables.
    #[serde(default, rename = "with", deserialize_with = "scalar_map")]
    pub variables: Variables,
}

impl NodeSettings {
    /// Decoded `enabled` flag; `None` if the value is not a boolean.
    pub fn enabled(&self) -> Option<bool> {
        match &self.enabled {
            None => Some(true),
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
        }
    }

    fn normalize(&mut self) {
        self.name = self.name.as_deref().map(normalize_whitespace);
        self.description = self.description.as_deref().map(normalize_whitespace);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pipeline {
    #[serde(flatten)]
    pub settings: NodeSettings,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    #[serde(flatten)]
    pub settings: NodeSettings,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub settings: NodeSettings,
    /// Multi-line command body.
    #[serde(default)]
    pub run: String,
}

#[derive(Debug, Deserialize)]
struct Document {
    pipeline: Pipeline,
}

/// Tree level of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Pipeline,
    Job,
    Step,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeKind::Pipeline => "pipeline",
            NodeKind::Job => "job",
            NodeKind::Step => "step",
        })
    }
}

/// Console label for a node, e.g. `@step id=[hello] name=[Say hello]`.
pub fn label(kind: NodeKind, settings: &NodeSettings) -> String {
    let mut label = format!("@{}", kind);
    if let Some(id) = settings.id.as_deref().filter(|s| !s.trim().is_empty()) {
        label.push_str(&format!(" id=[{}]", id));
    }
    if let Some(name) = settings.name.as_deref().filter(|s| !s.trim().is_empty()) {
        label.push_str(&format!(" name=[{}]", name));
    }
    label
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load a pipeline document from a YAML file.
pub fn load_file(path: &Path) -> Result<Pipeline> {
    let contents = std::fs::read_to_string(path).map_err(|e| EngineError::Model {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    debug!(path = %path.display(), bytes = contents.len(), "loaded pipeline file");
    parse(&contents).map_err(|message| EngineError::Model {
        path: path.display().to_string(),
        message,
    })
}

/// Parse a pipeline document from a YAML string.
pub fn from_yaml_str(contents: &str) -> Result<Pipeline> {
    parse(contents).map_err(|message| EngineError::Model {
        path: "<string>".into(),
        message,
    })
}

fn parse(contents: &str) -> std::result::Result<Pipeline, String> {
    let document: Document = serde_yaml::from_str(contents).map_err(|e| e.to_string())?;
    let mut pipeline = document.pipeline;
    pipeline.settings.normalize();
    for job in &mut pipeline.jobs {
        job.settings.normalize();
        for step in &mut job.steps {
            step.settings.normalize();
        }
    }
    Ok(pipeline)
}

/// Replace CR, LF and TAB with spaces, collapse runs of spaces, and trim.
fn normalize_whitespace(input: &str) -> String {
    input
        .split(['\r', '\n', '\t', ' '])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Scalar coercion
// ─────────────────────────────────────────────────────────────────────────────

/// Accept strings, numbers, and booleans as text.
fn scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    value.map(scalar_to_string::<D::Error>).transpose()
}

fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<Variables, D::Error>
where
    D: Deserializer<'de>,
{
    let map = Option::<BTreeMap<String, serde_yaml::Value>>::deserialize(deserializer)?;
    map.unwrap_or_default()
        .into_iter()
        .map(|(k, v)| scalar_to_string::<D::Error>(v).map(|v| (k, v)))
        .collect()
}

fn scalar_to_string<E: serde::de::Error>(value: serde_yaml::Value) -> std::result::Result<String, E> {
    match value {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(E::custom(format!("expected a scalar value, found {:?}", other))),
    }
}

//! Declarative pipeline definitions.
//!
//! A pipeline is defined as a TOML mapping from task name to execution
//! descriptor, declared inputs/outputs, and explicit predecessors.
//! Definitions may reference run parameters by `{name}` placeholder,
//! substituted at submission time, and compile to a portable JSON
//! artifact that parses back to an equivalent definition.

use crate::core::dag::PipelineDag;
use crate::core::task::{ExecSpec, InputBinding, TaskSpec};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Substitute `{name}` placeholders from the given variables.
///
/// Unknown placeholders and unterminated braces are definition errors:
/// a template that cannot fully resolve must never reach a backend.
pub fn substitute(template: &str, vars: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(Error::Definition(format!(
                "unterminated placeholder in '{}'",
                template
            )));
        };
        let key = &after[..end];
        let value = vars.get(key).ok_or_else(|| {
            Error::Definition(format!(
                "unknown parameter '{{{}}}' in '{}'",
                key, template
            ))
        })?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Pipeline-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMeta {
    /// Pipeline name, used in reports and logs.
    pub name: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One task entry in a definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDef {
    /// Image override; defaults to the run-level `{image}` parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Command to invoke.
    pub command: Vec<String>,
    /// Static arguments, before resolved locations are appended.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Declared inputs: local name -> `task/output` or `external:<uri>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,
    /// Declared output slots.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// Explicit predecessors beyond data dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,
}

/// A declarative pipeline: metadata plus a task table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline metadata.
    pub pipeline: PipelineMeta,
    /// Task table, keyed by task name.
    pub tasks: BTreeMap<String, TaskDef>,
}

impl PipelineDefinition {
    /// Load a definition from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Parse a definition from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let def: Self = toml::from_str(text)?;
        if def.pipeline.name.trim().is_empty() {
            return Err(Error::Definition("pipeline name is empty".to_string()));
        }
        if def.tasks.is_empty() {
            return Err(Error::Definition("pipeline has no tasks".to_string()));
        }
        Ok(def)
    }

    /// Parse a compiled definition from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Compile to the portable JSON artifact. Templates are preserved;
    /// substitution stays a submission-time concern.
    pub fn compile_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Lower the definition into task specs.
    pub fn build_specs(&self) -> Result<Vec<TaskSpec>> {
        let mut specs = Vec::with_capacity(self.tasks.len());
        for (name, def) in &self.tasks {
            let image = def.image.clone().unwrap_or_else(|| "{image}".to_string());
            let mut spec = TaskSpec::new(
                name.as_str(),
                ExecSpec::new(image, def.command.clone(), def.args.clone()),
            );
            for (input_name, reference) in &def.inputs {
                spec = spec.with_input(parse_input(name, input_name, reference)?);
            }
            for output in &def.outputs {
                spec = spec.with_output(output.clone());
            }
            for predecessor in &def.after {
                spec = spec.with_after(predecessor.as_str());
            }
            specs.push(spec);
        }
        Ok(specs)
    }

    /// Lower the definition into a DAG with all edges derived.
    pub fn build_dag(&self) -> Result<PipelineDag> {
        PipelineDag::from_specs(self.build_specs()?)
    }
}

/// Parse one input reference: `external:<uri>` or `<task>/<output>`.
fn parse_input(task: &str, input: &str, reference: &str) -> Result<InputBinding> {
    if let Some(uri) = reference.strip_prefix("external:") {
        if uri.is_empty() {
            return Err(Error::Definition(format!(
                "task '{}' input '{}' has an empty external URI",
                task, input
            )));
        }
        return Ok(InputBinding::external(input, uri));
    }
    match reference.split_once('/') {
        Some((producer, output)) if !producer.is_empty() && !output.is_empty() => {
            Ok(InputBinding::from_task(input, producer, output))
        }
        _ => Err(Error::Definition(format!(
            "task '{}' input '{}' has malformed reference '{}' \
             (expected 'task/output' or 'external:<uri>')",
            task, input, reference
        ))),
    }
}

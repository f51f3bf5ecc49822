//! Workflow document parsing and validation.
//!
//! Accepts either a singular `trigger` field or a list `triggers`. For
//! each step, validates that `depends_on` ids resolve and that the
//! resulting graph has no cycles. Plugin action config validation
//! (schema lookup against the registry) happens in `registry.rs`, since
//! it requires the registry to be populated; absence of a schema is not
//! an error here.

use std::path::Path;

use serde::Deserialize;
use sha2_free_hash::content_hash;
use thiserror::Error;
use weavr_types::workflow::Workflow;

use super::dag;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid workflow: {field}: {message}")]
    InvalidWorkflow { field: String, message: String },

    #[error("{0}")]
    CycleDetected(String),

    #[error("{0}")]
    UnknownDependency(String),

    #[error("yaml parse error: {0}")]
    Yaml(String),

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Raw document shape, accepting either `trigger` (singular) or
/// `triggers` (list) before normalizing into `Workflow::triggers`.
#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    env: std::collections::HashMap<String, String>,
    #[serde(default)]
    trigger: Option<weavr_types::workflow::Trigger>,
    #[serde(default)]
    triggers: Vec<weavr_types::workflow::Trigger>,
    #[serde(default)]
    memory: Vec<weavr_types::workflow::MemoryBlock>,
    #[serde(default)]
    steps: Vec<weavr_types::workflow::Step>,
}

/// Parse a workflow document's YAML text into the typed model, validating
/// step references and acyclicity. `fallback_name` is used when the
/// document omits a top-level `name` (the file's base name).
pub fn parse(text: &str, fallback_name: &str) -> Result<Workflow, ParseError> {
    let raw: RawDocument =
        serde_yaml_ng::from_str(text).map_err(|e| ParseError::Yaml(e.to_string()))?;

    let mut triggers = raw.triggers;
    if let Some(single) = raw.trigger {
        triggers.insert(0, single);
    }

    let workflow = Workflow {
        name: raw.name.unwrap_or_else(|| fallback_name.to_string()),
        description: raw.description,
        env: raw.env,
        triggers,
        memory: raw.memory,
        steps: raw.steps,
    };

    validate(&workflow)?;
    Ok(workflow)
}

/// Validate step id uniqueness, dependency resolution, and acyclicity.
pub fn validate(workflow: &Workflow) -> Result<(), ParseError> {
    let mut seen = std::collections::HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(ParseError::InvalidWorkflow {
                field: "steps".to_string(),
                message: format!("duplicate step id '{}'", step.id),
            });
        }
    }

    dag::validate_dag(&workflow.steps)?;
    Ok(())
}

/// Serialize a workflow back to YAML text. Used for content-addressing
/// (queue rows store `workflow_content`) and for the parser round trip.
pub fn serialize(workflow: &Workflow) -> Result<String, ParseError> {
    serde_yaml_ng::to_string(workflow).map_err(|e| ParseError::Yaml(e.to_string()))
}

/// Stable content hash of a workflow's serialized text, used to detect
/// whether a running/queued definition has drifted from the file on
/// disk.
pub fn workflow_content_hash(workflow: &Workflow) -> Result<String, ParseError> {
    let text = serialize(workflow)?;
    Ok(content_hash(text.as_bytes()))
}

/// Load and parse every `.yaml`/`.yml` file in `dir` (workflow files
/// live in a per-user directory, default `<home>/.weavr/workflows`).
/// Parse failures are logged and the offending file is skipped; the
/// scheduler continues with the workflows that did parse.
pub fn load_dir(dir: &Path) -> Result<Vec<Workflow>, ParseError> {
    let mut workflows = Vec::new();

    let entries = std::fs::read_dir(dir).map_err(|e| ParseError::Io {
        path: dir.display().to_string(),
        source: e,
    })?;

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);
        if !is_yaml {
            continue;
        }

        let fallback_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow")
            .to_string();

        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read workflow file");
                continue;
            }
        };

        match parse(&text, &fallback_name) {
            Ok(workflow) => workflows.push(workflow),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse workflow file, skipping");
            }
        }
    }

    Ok(workflows)
}

/// Tiny dependency-free content hash: pulling in `sha2`
/// would pull in a whole hashing stack for one `hex(digest)` call, so a
/// small FNV-1a implementation is used instead (non-cryptographic; this
/// hash is only a change-detection fingerprint, never a security
/// boundary).
mod sha2_free_hash {
    pub fn content_hash(bytes: &[u8]) -> String {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;
        let mut hash = FNV_OFFSET;
        for byte in bytes {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        format!("{hash:016x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINEAR: &str = r#"
name: linear-demo
steps:
  - id: a
    action: transform
    config:
      template: "{{ trigger.x }}"
  - id: b
    action: transform
    depends_on: [a]
    config:
      template: "{{ steps.a }}!"
"#;

    #[test]
    fn parses_plural_triggers() {
        let yaml = r#"
name: demo
triggers:
  - type: cron.schedule
    expression: "* * * * *"
  - type: http.webhook
    path: orders
steps: []
"#;
        let workflow = parse(yaml, "fallback").unwrap();
        assert_eq!(workflow.triggers.len(), 2);
    }

    #[test]
    fn parses_singular_trigger() {
        let yaml = r#"
name: demo
trigger:
  type: http.webhook
  path: orders
steps: []
"#;
        let workflow = parse(yaml, "fallback").unwrap();
        assert_eq!(workflow.triggers.len(), 1);
    }

    #[test]
    fn name_falls_back_to_filename() {
        let yaml = "steps: []\n";
        let workflow = parse(yaml, "my-workflow").unwrap();
        assert_eq!(workflow.name, "my-workflow");
    }

    #[test]
    fn linear_dag_parses_and_validates() {
        let workflow = parse(LINEAR, "linear").unwrap();
        assert_eq!(workflow.steps.len(), 2);
    }

    /// A cycle is rejected with an `InvalidWorkflow`-class error.
    #[test]
    fn cyclic_steps_rejected() {
        let yaml = r#"
name: cyclic
steps:
  - id: a
    action: transform
    depends_on: [b]
    config: {}
  - id: b
    action: transform
    depends_on: [a]
    config: {}
"#;
        let err = parse(yaml, "cyclic").unwrap_err();
        assert!(matches!(err, ParseError::CycleDetected(_)));
    }

    #[test]
    fn duplicate_step_ids_rejected() {
        let yaml = r#"
name: dup
steps:
  - id: a
    action: transform
    config: {}
  - id: a
    action: transform
    config: {}
"#;
        let err = parse(yaml, "dup").unwrap_err();
        assert!(matches!(err, ParseError::InvalidWorkflow { .. }));
    }

    /// parse(serialize(parse(doc))) == parse(doc).
    #[test]
    fn parser_round_trips() {
        let first = parse(LINEAR, "linear").unwrap();
        let text = serialize(&first).unwrap();
        let second = parse(&text, "linear").unwrap();
        assert_eq!(first.name, second.name);
        assert_eq!(first.steps.len(), second.steps.len());
        assert_eq!(first.steps[0].id, second.steps[0].id);
        assert_eq!(first.steps[1].depends_on, second.steps[1].depends_on);
    }

    #[test]
    fn content_hash_is_stable_for_identical_workflows() {
        let a = parse(LINEAR, "linear").unwrap();
        let b = parse(LINEAR, "linear").unwrap();
        assert_eq!(
            workflow_content_hash(&a).unwrap(),
            workflow_content_hash(&b).unwrap()
        );
    }

    #[test]
    fn load_dir_skips_unparseable_files_and_loads_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.yaml"), LINEAR).unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "not: [valid, yaml: {{{").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "irrelevant").unwrap();

        let workflows = load_dir(dir.path()).unwrap();
        assert_eq!(workflows.len(), 1);
        assert_eq!(workflows[0].name, "linear-demo");
    }
}

//! Canonical workflow domain types.
//!
//! The scheduler's declarative document
//! model (`Workflow`, `Step`, `MemoryBlock`, `Trigger`) parsed from a
//! workflow file, the in-flight execution model (`WorkflowRun`,
//! `StepResult`), and the durable store row types (`QueueRecord`,
//! `ScheduleRecord`, `HistoryRecord`, `TokenUsageRecord`).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Workflow document
// ---------------------------------------------------------------------------

/// A parsed, validated workflow document. Immutable; content-addressed by
/// its serialized text (see `Workflow::content_hash`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub memory: Vec<MemoryBlock>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One action within a workflow's dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// Fully-qualified action name (`<plugin>.<action>` or a built-in name).
    pub action: String,
    /// Action-specific options; string values may contain `{{ expr }}`
    /// template placeholders, resolved at execution time.
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Per-step retry policy. Distinct from the queue-level retry
/// policy in `SchedulerConfig` -- these are two separate loops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay_ms: 1000,
        }
    }
}

// ---------------------------------------------------------------------------
// Memory blocks
// ---------------------------------------------------------------------------

/// A pre-run assembled text fragment, made available to templates as
/// `memory.blocks.<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub id: String,
    #[serde(default)]
    pub sources: Vec<MemorySource>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default)]
    pub dedupe: bool,
    #[serde(default)]
    pub max_chars: Option<usize>,
}

fn default_separator() -> String {
    "\n\n".to_string()
}

/// One source feeding a memory block, tagged by its resolution strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySource {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub max_chars: Option<usize>,
    #[serde(flatten)]
    pub kind: MemorySourceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemorySourceKind {
    Text { text: String },
    File { path: String },
    Url { url: String },
    WebSearch {
        query: String,
        #[serde(default)]
        max_results: Option<u32>,
    },
    Step {
        step_id: String,
        #[serde(default)]
        path: Option<String>,
    },
    Trigger {
        #[serde(default)]
        path: Option<String>,
    },
}

impl MemorySourceKind {
    /// The `type` discriminant, used to compose `[memory:<blockId>] Failed to
    /// load <type> source: <err>` marker strings on source failure.
    pub fn type_name(&self) -> &'static str {
        match self {
            MemorySourceKind::Text { .. } => "text",
            MemorySourceKind::File { .. } => "file",
            MemorySourceKind::Url { .. } => "url",
            MemorySourceKind::WebSearch { .. } => "web_search",
            MemorySourceKind::Step { .. } => "step",
            MemorySourceKind::Trigger { .. } => "trigger",
        }
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// Trigger declarations mix three fixed built-in shapes with an open set
/// of plugin-defined long-poll triggers whose config schema is unknown to
/// this crate. `#[serde(tag = "type")]` can't express "closed set plus
/// catch-all with the tag value kept," so `Trigger` implements
/// `Serialize`/`Deserialize` by hand against the `type` discriminant.
#[derive(Debug, Clone)]
pub enum Trigger {
    CronSchedule {
        expression: String,
        timezone: Option<String>,
    },
    HttpWebhook {
        path: String,
        provider: Option<String>,
    },
    EmailInbound {
        path: Option<String>,
        provider: Option<String>,
    },
    /// Plugin-defined long-poll trigger; schema is plugin-specific.
    Plugin {
        plugin_type: String,
        config: serde_json::Map<String, Value>,
    },
}

impl Trigger {
    /// The `triggerType` discriminant used in schedule ids and queue rows.
    pub fn type_name(&self) -> &str {
        match self {
            Trigger::CronSchedule { .. } => "cron.schedule",
            Trigger::HttpWebhook { .. } => "http.webhook",
            Trigger::EmailInbound { .. } => "email.inbound",
            Trigger::Plugin { plugin_type, .. } => plugin_type.as_str(),
        }
    }
}

impl Serialize for Trigger {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.type_name())?;
        match self {
            Trigger::CronSchedule {
                expression,
                timezone,
            } => {
                map.serialize_entry("expression", expression)?;
                if let Some(tz) = timezone {
                    map.serialize_entry("timezone", tz)?;
                }
            }
            Trigger::HttpWebhook { path, provider } => {
                map.serialize_entry("path", path)?;
                if let Some(p) = provider {
                    map.serialize_entry("provider", p)?;
                }
            }
            Trigger::EmailInbound { path, provider } => {
                if let Some(p) = path {
                    map.serialize_entry("path", p)?;
                }
                if let Some(p) = provider {
                    map.serialize_entry("provider", p)?;
                }
            }
            Trigger::Plugin { config, .. } => {
                for (k, v) in config {
                    map.serialize_entry(k, v)?;
                }
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Trigger {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let mut value = serde_json::Map::deserialize(deserializer)?;
        let ty = value
            .remove("type")
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| D::Error::missing_field("type"))?;

        fn take_str(map: &mut serde_json::Map<String, Value>, key: &str) -> Option<String> {
            map.remove(key).and_then(|v| v.as_str().map(str::to_string))
        }

        match ty.as_str() {
            "cron.schedule" => {
                let expression = take_str(&mut value, "expression")
                    .ok_or_else(|| D::Error::missing_field("expression"))?;
                let timezone = take_str(&mut value, "timezone");
                Ok(Trigger::CronSchedule {
                    expression,
                    timezone,
                })
            }
            "http.webhook" => {
                let path =
                    take_str(&mut value, "path").ok_or_else(|| D::Error::missing_field("path"))?;
                let provider = take_str(&mut value, "provider");
                Ok(Trigger::HttpWebhook { path, provider })
            }
            "email.inbound" => {
                let path = take_str(&mut value, "path");
                let provider = take_str(&mut value, "provider");
                Ok(Trigger::EmailInbound { path, provider })
            }
            other => Ok(Trigger::Plugin {
                plugin_type: other.to_string(),
                config: value,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight run / step result model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StepResult {
    pub fn pending(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            output: None,
            error: None,
        }
    }
}

/// An in-flight or just-finished execution instance of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_data: Value,
    #[serde(default)]
    pub steps: HashMap<String, StepResult>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub memory: Option<Value>,
}

// ---------------------------------------------------------------------------
// Durable store rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// A durably-queued run, the unit claimed by the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub id: Uuid,
    pub workflow_name: String,
    pub trigger_type: String,
    pub trigger_data: Value,
    /// Serialized workflow text at enqueue time (content-addressed replay).
    pub workflow_content: String,
    pub status: QueueStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Active,
    Paused,
}

/// Persisted schedule state for one trigger of one workflow.
///
/// `id` is the stable `name::triggerType::index` key used throughout the
/// Trigger Scheduler and Trigger Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: String,
    pub workflow_name: String,
    pub trigger_type: String,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    pub status: ScheduleState,
}

impl ScheduleRecord {
    /// Build the stable `name::triggerType::index` id.
    pub fn make_id(workflow_name: &str, trigger_type: &str, index: usize) -> String {
        format!("{workflow_name}::{trigger_type}::{index}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Failed,
}

/// A completed-run history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub workflow_name: String,
    pub status: HistoryStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub trigger_data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One log line attached to a run, optionally scoped to a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default)]
    pub step_id: Option<String>,
    pub message: String,
}

/// One step's final result, persisted alongside a history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStepRow {
    pub run_id: Uuid,
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Option<Value>,
}

/// A completed run bundled with its logs and step rows, persisted
/// atomically by `SchedulerStore::save_completed_run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedRun {
    pub history: HistoryRecord,
    pub logs: Vec<RunLog>,
    pub steps: Vec<RunStepRow>,
}

/// AI token-usage accounting, tracked per run/step when actions report it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    pub timestamp: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub run_id: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Query filters
// ---------------------------------------------------------------------------

/// Filter/pagination parameters for `SchedulerStore::get_run_history`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    #[serde(default)]
    pub workflow_name: Option<String>,
}

/// Filter parameters for `SchedulerStore::get_token_usage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsageQuery {
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub workflow_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_defaults_match_spec() {
        let retry = RetryConfig::default();
        assert_eq!(retry.attempts, 1);
        assert_eq!(retry.delay_ms, 1000);
    }

    #[test]
    fn step_retry_defaults_when_omitted() {
        let yaml = r#"
id: fetch
action: http.get
"#;
        let step: Step = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(step.retry.attempts, 1);
        assert_eq!(step.retry.delay_ms, 1000);
    }

    #[test]
    fn trigger_cron_round_trips_type_name() {
        let trigger = Trigger::CronSchedule {
            expression: "*/5 * * * *".to_string(),
            timezone: None,
        };
        assert_eq!(trigger.type_name(), "cron.schedule");
    }

    #[test]
    fn memory_source_text_deserializes() {
        let yaml = r#"
id: intro
type: text
text: "hello {{ trigger.name }}"
"#;
        let source: MemorySource = serde_yaml_ng::from_str(yaml).unwrap();
        match source.kind {
            MemorySourceKind::Text { text } => assert_eq!(text, "hello {{ trigger.name }}"),
            _ => panic!("expected Text source"),
        }
    }

    #[test]
    fn schedule_id_is_stable() {
        let id = ScheduleRecord::make_id("daily-digest", "cron.schedule", 0);
        assert_eq!(id, "daily-digest::cron.schedule::0");
    }

    #[test]
    fn workflow_parses_singular_and_plural_trigger_field() {
        let yaml_singular = r#"
name: demo
steps: []
trigger:
  type: cron.schedule
  expression: "* * * * *"
"#;
        // `Workflow` itself only has `triggers`; the singular->plural
        // normalization happens in the parser (definition.rs), not here.
        let err = serde_yaml_ng::from_str::<Workflow>(yaml_singular);
        assert!(err.is_err(), "bare `trigger` key is not `Workflow`'s shape");
    }
}

//! Span field name constants for workflow run instrumentation.
//!
//! These keep the executor and scheduler tagging spans with the same
//! field names instead of each call site inventing its own, the way
//! `gen_ai.*` keeps LLM call sites consistent.

/// The run id of the workflow execution a span belongs to.
pub const WORKFLOW_RUN_ID: &str = "workflow.run_id";

/// The name of the workflow document being executed.
pub const WORKFLOW_NAME: &str = "workflow.name";

/// The id of the step a span covers.
pub const WORKFLOW_STEP_ID: &str = "workflow.step_id";

/// The wave index (0-based DAG depth) a step belongs to.
pub const WORKFLOW_WAVE: &str = "workflow.wave";

/// The trigger type (`cron`, `webhook`, `github`, or a plugin name) that
/// produced the run being traced.
pub const WORKFLOW_TRIGGER_TYPE: &str = "workflow.trigger_type";

//! `SchedulerConfig` -- the deserialized shape of `<home>/.weavr/config.yaml`
//!

use serde::{Deserialize, Serialize};

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_concurrency() -> u32 {
    4
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    5000
}
fn default_catch_up_window_ms() -> i64 {
    86_400_000
}
fn default_max_catch_up_runs() -> u32 {
    10
}

/// Top-level scheduler configuration. Sections whose shape is owned by
/// out-of-scope collaborators (web search provider keys, MCP, SMTP,
/// messaging) are kept as opaque JSON passthrough so this crate never
/// needs to know their internal structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    pub max_concurrency: u32,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub catch_up_window_ms: i64,
    pub max_catch_up_runs: u32,
    pub timezone: Option<String>,
    pub workflows_dir: Option<String>,
    pub db_path: Option<String>,

    #[serde(default)]
    pub web_search: serde_json::Value,
    #[serde(default)]
    pub mcp: serde_json::Value,
    #[serde(default)]
    pub email: serde_json::Value,
    #[serde(default)]
    pub messaging: serde_json::Value,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            catch_up_window_ms: default_catch_up_window_ms(),
            max_catch_up_runs: default_max_catch_up_runs(),
            timezone: None,
            workflows_dir: None,
            db_path: None,
            web_search: serde_json::Value::Null,
            mcp: serde_json::Value::Null,
            email: serde_json::Value::Null,
            messaging: serde_json::Value::Null,
        }
    }
}

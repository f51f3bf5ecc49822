//! `<home>/.weavr/config.yaml` loader.
//!
//! Reads the scheduler config from the data directory, falling back to
//! `SchedulerConfig::default()` with a logged warning on a missing or
//! malformed file. YAML rather than TOML, since this crate's config
//! already has a natural YAML sibling (the workflow documents
//! themselves).

use std::path::{Path, PathBuf};

use weavr_types::config::SchedulerConfig;

/// Resolve the Weavr data directory: `WEAVR_DATA_DIR` env var if set,
/// otherwise `<home>/.weavr`.
pub fn data_dir() -> PathBuf {
    std::env::var("WEAVR_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".weavr"))
}

/// Load `{data_dir}/config.yaml`.
///
/// - Missing file: returns `SchedulerConfig::default()`.
/// - Malformed file: logs a warning and returns the default.
/// - Otherwise: returns the parsed config, `workflows_dir`/`db_path`
///   filled in against `data_dir` when absent from the file.
pub async fn load_config(data_dir: &Path) -> SchedulerConfig {
    let config_path = data_dir.join("config.yaml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config.yaml found, using defaults");
            return with_defaults(SchedulerConfig::default(), data_dir);
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config.yaml, using defaults");
            return with_defaults(SchedulerConfig::default(), data_dir);
        }
    };

    match serde_yaml_ng::from_str::<SchedulerConfig>(&content) {
        Ok(config) => with_defaults(config, data_dir),
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config.yaml, using defaults");
            with_defaults(SchedulerConfig::default(), data_dir)
        }
    }
}

fn with_defaults(mut config: SchedulerConfig, data_dir: &Path) -> SchedulerConfig {
    if config.workflows_dir.is_none() {
        config.workflows_dir = Some(data_dir.join("workflows").display().to_string());
    }
    if config.db_path.is_none() {
        config.db_path = Some(data_dir.join("scheduler.db").display().to_string());
    }
    config
}

/// Environment variables consulted for out-of-scope plugin/adapter
/// credentials. The core never reads these itself -- this table
/// exists so a gateway or plugin host can resolve a secret name to an
/// env var the same way regardless of which adapter asked.
pub const CREDENTIAL_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "BRAVE_API_KEY",
    "TAVILY_API_KEY",
    "GITHUB_TOKEN",
    "TELEGRAM_BOT_TOKEN",
    "SMTP_HOST",
    "SMTP_PORT",
    "SMTP_USERNAME",
    "SMTP_PASSWORD",
    "EMAIL_FROM",
    "EMAIL_API_KEY",
    "RESEND_API_KEY",
];

/// Resolve a named credential from the environment, returning `None` if
/// unset. `name` must be one of [`CREDENTIAL_ENV_VARS`].
pub fn resolve_credential(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

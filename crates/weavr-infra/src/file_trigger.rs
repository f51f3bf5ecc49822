//! Filesystem-watch trigger plugin, registered under `file.watch`.
//!
//! A background task owns the `Debouncer`, filters events by glob
//! pattern, and forwards matches to the Trigger Manager's `emit`
//! callback, wrapped behind the core's object-safe
//! `TriggerDescriptor`/`TriggerHandle` traits so it plugs into the
//! same registry as any other trigger source.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer};
use serde_json::Value;

use weavr_core::workflow::registry::{ActionError, EmitFn, TriggerDescriptor, TriggerHandle};

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Default debounce window when `config.debounce_ms` is absent.
const DEFAULT_DEBOUNCE_MS: u64 = 500;

pub struct FileWatchTrigger;

impl TriggerDescriptor for FileWatchTrigger {
    fn name(&self) -> &'static str {
        "file.watch"
    }

    fn setup<'a>(
        &'a self,
        config: &'a Value,
        emit: EmitFn,
    ) -> BoxFuture<'a, Result<Box<dyn TriggerHandle>, ActionError>> {
        Box::pin(async move {
            let paths: Vec<String> = config
                .get("paths")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .or_else(|| config.get("path").and_then(Value::as_str).map(|p| vec![p.to_string()]))
                .ok_or_else(|| {
                    ActionError::InvalidConfig("file.watch requires 'path' or 'paths'".into())
                })?;

            if paths.is_empty() {
                return Err(ActionError::InvalidConfig(
                    "file.watch 'paths' must not be empty".into(),
                ));
            }

            let patterns: Option<Vec<String>> = config
                .get("patterns")
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect());

            let debounce_ms = config
                .get("debounce_ms")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_DEBOUNCE_MS);

            let debouncer = start_watcher(&paths, patterns, debounce_ms, emit).map_err(|e| {
                ActionError::ExecutionFailed(format!("file.watch setup failed: {e}"))
            })?;

            Ok(Box::new(FileWatchHandle {
                _debouncer: debouncer,
                watched_paths: paths.into_iter().map(PathBuf::from).collect(),
            }) as Box<dyn TriggerHandle>)
        })
    }

    fn config_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(FileWatchConfig)).unwrap_or_default()
    }
}

#[derive(schemars::JsonSchema)]
struct FileWatchConfig {
    path: Option<String>,
    paths: Option<Vec<String>>,
    patterns: Option<Vec<String>>,
    debounce_ms: Option<u64>,
}

struct FileWatchHandle {
    _debouncer: Debouncer<RecommendedWatcher>,
    watched_paths: Vec<PathBuf>,
}

impl TriggerHandle for FileWatchHandle {
    fn teardown<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(paths = ?self.watched_paths, "file.watch trigger torn down");
        })
    }
}

fn start_watcher(
    paths: &[String],
    patterns: Option<Vec<String>>,
    debounce_ms: u64,
    emit: EmitFn,
) -> Result<Debouncer<RecommendedWatcher>, notify::Error> {
    let pats: Option<Arc<Vec<String>>> = patterns.map(Arc::new);

    let mut debouncer = new_debouncer(
        Duration::from_millis(debounce_ms),
        move |result: DebounceEventResult| {
            let events = match result {
                Ok(events) => events,
                Err(err) => {
                    tracing::warn!(error = %err, "file.watch error");
                    return;
                }
            };

            let filtered = filter_events(&events, pats.as_deref());
            if filtered.is_empty() {
                return;
            }

            for event in filtered {
                let emit = emit.clone();
                let payload = serde_json::json!({
                    "path": event.path.display().to_string(),
                    "detected_at": chrono::Utc::now().to_rfc3339(),
                });
                tokio::spawn(async move { emit(payload).await });
            }
        },
    )?;

    for path_str in paths {
        let path = Path::new(path_str);
        debouncer.watcher().watch(path, RecursiveMode::Recursive)?;
    }

    // Dropping the returned `Debouncer` (owned by `FileWatchHandle`) is
    // what ends the watch; there's no separate cancellation handle.
    Ok(debouncer)
}

/// Filter debounced events by glob pattern, matched against the file
/// name. `None`/empty patterns pass every event through.
fn filter_events(events: &[DebouncedEvent], patterns: Option<&[String]>) -> Vec<DebouncedEvent> {
    match patterns {
        None => events.to_vec(),
        Some(pats) if pats.is_empty() => events.to_vec(),
        Some(pats) => events
            .iter()
            .filter(|event| {
                let file_name = event.path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                pats.iter().any(|pattern| glob_match(pattern, file_name))
            })
            .cloned()
            .collect(),
    }
}

/// Lightweight glob matcher (`*`, `?`) -- avoids pulling in a dedicated
/// glob crate for this one use site.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    glob_match_recursive(&pat, 0, &txt, 0)
}

fn glob_match_recursive(pattern: &[char], pi: usize, text: &[char], ti: usize) -> bool {
    let mut pi = pi;
    let mut ti = ti;

    while pi < pattern.len() {
        match pattern[pi] {
            '*' => {
                while pi < pattern.len() && pattern[pi] == '*' {
                    pi += 1;
                }
                if pi >= pattern.len() {
                    return true;
                }
                while ti <= text.len() {
                    if glob_match_recursive(pattern, pi, text, ti) {
                        return true;
                    }
                    ti += 1;
                }
                return false;
            }
            '?' => {
                if ti >= text.len() {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
            c => {
                if ti >= text.len() || text[ti] != c {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
        }
    }

    ti >= text.len()
}

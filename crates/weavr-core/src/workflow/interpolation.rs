//! `{{ expr }}` template interpolation.
//!
//! Expressions are dotted paths into the run context (`trigger.*`,
//! `steps.<id>.*`, `env.*`, `memory.<id>`, `now.*`), with optional
//! `[n]` array indexing at any segment. A path that does not resolve
//! interpolates to an empty string rather than erroring -- templates
//! are expected to tolerate optional upstream fields.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use serde_json::Value;

static EXPR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("valid regex"));

/// Build the `now.*` object interpolated into every run, matching the
/// expression's evaluation time (captured once per step, not re-read
/// per interpolation, so a single step sees a consistent clock).
pub fn now_context() -> Value {
    let now = Utc::now();
    serde_json::json!({
        "currentDate": now.format("%Y-%m-%d").to_string(),
        "currentTime": now.format("%H:%M:%S").to_string(),
        "currentTimestamp": now.timestamp_millis(),
        "currentISODate": now.to_rfc3339(),
    })
}

/// Resolve a dotted-path expression (e.g. `steps.a.output[0].name`)
/// against a context value. Each segment is either a bare object key or
/// a key followed by one or more `[n]` array indices.
pub fn resolve_path<'a>(root: &'a Value, expr: &str) -> Option<&'a Value> {
    let mut current = root;
    for raw_segment in expr.trim().split('.') {
        let (key, indices) = split_indices(raw_segment);
        if !key.is_empty() {
            current = current.as_object()?.get(key)?;
        }
        for idx in indices {
            current = current.as_array()?.get(idx)?;
        }
    }
    Some(current)
}

/// Split `foo[0][1]` into `("foo", [0, 1])`. A segment with no brackets
/// returns an empty index list.
fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let mut indices = Vec::new();
    let key_end = segment.find('[').unwrap_or(segment.len());
    let (key, rest) = segment.split_at(key_end);
    let mut remaining = rest;
    while let Some(open) = remaining.find('[') {
        let Some(close) = remaining[open..].find(']') else {
            break;
        };
        let close = open + close;
        if let Ok(idx) = remaining[open + 1..close].parse::<usize>() {
            indices.push(idx);
        }
        remaining = &remaining[close + 1..];
    }
    (key, indices)
}

/// Render a `Value` for substitution into template text: strings are
/// inserted raw (no surrounding quotes), everything else is rendered as
/// compact JSON.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Interpolate every `{{ expr }}` occurrence in `text` against `ctx`.
/// Unresolvable expressions become an empty string.
pub fn interpolate(text: &str, ctx: &Value) -> String {
    EXPR_RE
        .replace_all(text, |caps: &regex::Captures| {
            let expr = &caps[1];
            resolve_path(ctx, expr).map(render).unwrap_or_default()
        })
        .into_owned()
}

/// Recursively interpolate every string leaf of a JSON value (used to
/// resolve templates inside a step's `config` map before dispatch).
pub fn interpolate_value(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate(s, ctx)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| interpolate_value(v, ctx)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

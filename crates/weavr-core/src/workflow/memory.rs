//! Memory block assembly.
//!
//! Runs before interpolation proper: each `MemoryBlock` gathers content
//! from its sources (literal text, a local file, a fetched URL, a web
//! search, a prior step's output, or the trigger payload), normalises,
//! truncates and dedupes per the block's settings, and joins the result
//! into a single string that becomes `memory.<id>` in the run context.
//!
//! A source that fails to resolve does not abort the block: its slot is
//! replaced with an error marker (`[memory:<blockId>] Failed to load
//! <type> source: <err>`) and the failure is appended to the returned
//! log list, matching the failure-semantics table -- memory
//! errors are logged and substituted, never propagated.
//!
//! Fetching URLs and running web searches needs a live HTTP client and
//! HTML handling, which belong to `weavr-infra` -- this module only
//! depends on the `MemoryFetcher` trait boundary so the core crate
//! stays free of `reqwest`/`scraper`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;
use weavr_types::workflow::{MemoryBlock, MemorySource, MemorySourceKind};

use super::interpolation::{interpolate, resolve_path};

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to read memory file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    UrlFetch(String),

    #[error("{0}")]
    WebSearch(String),
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// HTTP/search boundary implemented by `weavr-infra`. Returned text is
/// assumed already reduced to plain text (HTML tags stripped, whitespace
/// collapsed, clipped to 12 000 chars -- the `url` source's text reduction).
pub trait MemoryFetcher: Send + Sync {
    fn fetch_url<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, MemoryError>>;

    fn web_search<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
    ) -> BoxFuture<'a, Result<Vec<String>, MemoryError>>;
}

/// One memory block, fully assembled.
#[derive(Debug, Clone, Default)]
pub struct AssembledBlock {
    pub text: String,
    /// Per-source resolved text, keyed by `MemorySource::id`. Feeds a
    /// block's own `template` and, via the executor, `memory.sources.*`.
    pub sources: HashMap<String, String>,
}

/// A memory-source failure, logged by the executor and substituted
/// into the block's text as an error marker string.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    pub block_id: String,
    pub message: String,
}

/// Assemble a single memory block into its final string plus the
/// per-source values used to build it. Never fails: source errors are
/// substituted with marker text and appended to `logs`.
pub async fn assemble_block(
    block: &MemoryBlock,
    ctx: &Value,
    fetcher: &dyn MemoryFetcher,
    logs: &mut Vec<MemoryLog>,
) -> AssembledBlock {
    let mut sources = HashMap::with_capacity(block.sources.len());
    let mut pieces: Vec<(Option<&str>, String)> = Vec::with_capacity(block.sources.len());

    for source in &block.sources {
        let resolved = match resolve_source(source, ctx, fetcher).await {
            Ok(value) => normalize(&value),
            Err(err) => {
                let marker = format!(
                    "[memory:{}] Failed to load {} source: {err}",
                    block.id,
                    source.kind.type_name(),
                );
                logs.push(MemoryLog {
                    block_id: block.id.clone(),
                    message: marker.clone(),
                });
                marker
            }
        };

        let resolved = match source.max_chars {
            Some(max) => truncate_with_suffix(&resolved, max),
            None => resolved,
        };

        sources.insert(source.id.clone(), resolved.clone());
        pieces.push((source.label.as_deref(), resolved));
    }

    let joined = match &block.template {
        Some(template) => {
            let mut tmpl_ctx = ctx.clone();
            if let Value::Object(map) = &mut tmpl_ctx {
                let sources_value = sources
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect::<serde_json::Map<_, _>>();
                map.insert("sources".to_string(), Value::Object(sources_value));
            }
            interpolate(template, &tmpl_ctx)
        }
        None => pieces
            .iter()
            .filter(|(_, content)| !content.is_empty())
            .map(|(label, content)| match label {
                Some(label) => format!("## {label}\n{content}"),
                None => content.clone(),
            })
            .collect::<Vec<_>>()
            .join(&block.separator),
    };

    let deduped = if block.dedupe {
        dedupe_lines(&joined)
    } else {
        joined
    };

    let text = match block.max_chars {
        Some(max) => truncate_with_suffix(&deduped, max),
        None => deduped,
    };

    AssembledBlock { text, sources }
}

async fn resolve_source(
    source: &MemorySource,
    ctx: &Value,
    fetcher: &dyn MemoryFetcher,
) -> Result<String, MemoryError> {
    match &source.kind {
        MemorySourceKind::Text { text } => Ok(interpolate(text, ctx)),

        MemorySourceKind::File { path } => {
            let resolved_path = interpolate(path, ctx);
            std::fs::read_to_string(&resolved_path).map_err(|e| MemoryError::FileRead {
                path: resolved_path,
                source: e,
            })
        }

        MemorySourceKind::Url { url } => {
            let resolved_url = interpolate(url, ctx);
            fetcher.fetch_url(&resolved_url).await
        }

        MemorySourceKind::WebSearch { query, max_results } => {
            let resolved_query = interpolate(query, ctx);
            let results = fetcher
                .web_search(&resolved_query, max_results.unwrap_or(5) as usize)
                .await?;
            Ok(results
                .iter()
                .enumerate()
                .map(|(i, r)| format!("{}. {r}", i + 1))
                .collect::<Vec<_>>()
                .join("\n"))
        }

        MemorySourceKind::Step { step_id, path } => {
            let expr = match path {
                Some(p) if !p.is_empty() => format!("steps.{step_id}.{p}"),
                _ => format!("steps.{step_id}"),
            };
            Ok(render_resolved(resolve_path(ctx, &expr)))
        }

        MemorySourceKind::Trigger { path } => {
            let expr = match path {
                Some(p) if !p.is_empty() => format!("trigger.{p}"),
                _ => "trigger".to_string(),
            };
            Ok(render_resolved(resolve_path(ctx, &expr)))
        }
    }
}

fn render_resolved(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Normalise line endings to `\n` and trim.
fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Remove duplicate trimmed non-empty lines, keeping the first
/// occurrence; blank lines are always preserved.
fn dedupe_lines(text: &str) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for line in text.split('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push(line);
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(line);
        }
    }
    out.join("\n")
}

/// Truncate to `max_chars`, appending "…" when truncation actually
/// occurred (source- and block-level `maxChars`).
fn truncate_with_suffix(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let truncated: String = text.chars().take(max_chars - 1).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopFetcher;

    impl MemoryFetcher for NoopFetcher {
        fn fetch_url<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, MemoryError>> {
            Box::pin(async move { Ok(format!("fetched:{url}")) })
        }

        fn web_search<'a>(
            &'a self,
            query: &'a str,
            max_results: usize,
        ) -> BoxFuture<'a, Result<Vec<String>, MemoryError>> {
            Box::pin(async move {
                Ok((0..max_results)
                    .map(|i| format!("{query} result {i}"))
                    .collect())
            })
        }
    }

    struct FailingFetcher;

    impl MemoryFetcher for FailingFetcher {
        fn fetch_url<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, Result<String, MemoryError>> {
            Box::pin(async move { Err(MemoryError::UrlFetch("connection refused".to_string())) })
        }

        fn web_search<'a>(
            &'a self,
            _query: &'a str,
            _max_results: usize,
        ) -> BoxFuture<'a, Result<Vec<String>, MemoryError>> {
            Box::pin(async move { Err(MemoryError::WebSearch("timed out".to_string())) })
        }
    }

    fn text_source(id: &str, text: &str) -> MemorySource {
        MemorySource {
            id: id.to_string(),
            label: None,
            max_chars: None,
            kind: MemorySourceKind::Text {
                text: text.to_string(),
            },
        }
    }

    fn block(sources: Vec<MemorySource>) -> MemoryBlock {
        MemoryBlock {
            id: "notes".to_string(),
            sources,
            template: None,
            separator: "\n\n".to_string(),
            dedupe: false,
            max_chars: None,
        }
    }

    #[tokio::test]
    async fn assembles_text_sources_with_separator() {
        let mut b = block(vec![text_source("a", "first"), text_source("b", "second")]);
        b.separator = " | ".to_string();
        let mut logs = Vec::new();
        let result = assemble_block(&b, &Value::Null, &NoopFetcher, &mut logs).await;
        assert_eq!(result.text, "first | second");
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn labels_become_markdown_headers() {
        let b = block(vec![MemorySource {
            id: "a".to_string(),
            label: Some("Background".to_string()),
            max_chars: None,
            kind: MemorySourceKind::Text {
                text: "hello".to_string(),
            },
        }]);
        let mut logs = Vec::new();
        let result = assemble_block(&b, &Value::Null, &NoopFetcher, &mut logs).await;
        assert_eq!(result.text, "## Background\nhello");
    }

    #[tokio::test]
    async fn dedupes_identical_lines_preserving_blanks() {
        let mut b = block(vec![text_source("a", "same\n\nsame\nother")]);
        b.dedupe = true;
        let mut logs = Vec::new();
        let result = assemble_block(&b, &Value::Null, &NoopFetcher, &mut logs).await;
        assert_eq!(result.text, "same\n\nother");
    }

    #[tokio::test]
    async fn source_max_chars_truncates_with_ellipsis() {
        let b = block(vec![MemorySource {
            id: "a".to_string(),
            label: None,
            max_chars: Some(4),
            kind: MemorySourceKind::Text {
                text: "0123456789".to_string(),
            },
        }]);
        let mut logs = Vec::new();
        let result = assemble_block(&b, &Value::Null, &NoopFetcher, &mut logs).await;
        assert_eq!(result.text, "012…");
    }

    #[tokio::test]
    async fn block_max_chars_truncates_joined_result() {
        let mut b = block(vec![text_source("a", "0123456789")]);
        b.max_chars = Some(5);
        let mut logs = Vec::new();
        let result = assemble_block(&b, &Value::Null, &NoopFetcher, &mut logs).await;
        assert_eq!(result.text, "0123…");
    }

    #[tokio::test]
    async fn resolves_step_source_from_context() {
        let b = block(vec![MemorySource {
            id: "a".to_string(),
            label: Some("prior".to_string()),
            max_chars: None,
            kind: MemorySourceKind::Step {
                step_id: "fetch".to_string(),
                path: Some("title".to_string()),
            },
        }]);
        let ctx = serde_json::json!({"steps": {"fetch": {"title": "hello"}}});
        let mut logs = Vec::new();
        let result = assemble_block(&b, &ctx, &NoopFetcher, &mut logs).await;
        assert_eq!(result.text, "## prior\nhello");
    }

    #[tokio::test]
    async fn template_interpolates_over_sources_map() {
        let mut b = block(vec![text_source("greeting", "hello")]);
        b.template = Some("say: {{ sources.greeting }}!".to_string());
        let mut logs = Vec::new();
        let result = assemble_block(&b, &Value::Null, &NoopFetcher, &mut logs).await;
        assert_eq!(result.text, "say: hello!");
    }

    #[tokio::test]
    async fn url_failure_substitutes_marker_and_logs() {
        let b = block(vec![MemorySource {
            id: "a".to_string(),
            label: None,
            max_chars: None,
            kind: MemorySourceKind::Url {
                url: "https://example.com".to_string(),
            },
        }]);
        let mut logs = Vec::new();
        let result = assemble_block(&b, &Value::Null, &FailingFetcher, &mut logs).await;
        assert!(result.text.starts_with("[memory:notes] Failed to load url source:"));
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_id, "notes");
    }

    #[tokio::test]
    async fn normalizes_crlf_line_endings() {
        let b = block(vec![text_source("a", "line1\r\nline2\r\n")]);
        let mut logs = Vec::new();
        let result = assemble_block(&b, &Value::Null, &NoopFetcher, &mut logs).await;
        assert_eq!(result.text, "line1\nline2");
    }

    #[tokio::test]
    async fn web_search_numbers_results() {
        let b = block(vec![MemorySource {
            id: "a".to_string(),
            label: None,
            max_chars: None,
            kind: MemorySourceKind::WebSearch {
                query: "rust".to_string(),
                max_results: Some(2),
            },
        }]);
        let mut logs = Vec::new();
        let result = assemble_block(&b, &Value::Null, &NoopFetcher, &mut logs).await;
        assert_eq!(result.text, "1. rust result 0\n2. rust result 1");
    }
}

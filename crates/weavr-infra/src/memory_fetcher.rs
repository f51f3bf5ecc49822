//! HTTP implementation of `MemoryFetcher`.
//!
//! `fetch_url` downloads a page with `reqwest` and reduces it to plain
//! text with `scraper`, stripping non-content tags before flattening.
//! `web_search` tries a small provider chain (Brave, then Tavily) and
//! falls through to an empty result set if neither credential is
//! configured.

use std::time::Duration;

use scraper::{Html, Selector};
use weavr_core::workflow::memory::{MemoryError, MemoryFetcher};

/// Max characters kept from a fetched page.
const MAX_FETCHED_CHARS: usize = 12_000;

const STRIPPED_TAGS: &[&str] = &["script", "style", "nav", "header", "footer", "aside", "noscript"];

pub struct HttpMemoryFetcher {
    client: reqwest::Client,
    brave_api_key: Option<String>,
    tavily_api_key: Option<String>,
}

impl HttpMemoryFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Weavr/1.0")
            .build()
            .expect("reqwest client with static config must build");

        Self {
            client,
            brave_api_key: crate::config::resolve_credential("BRAVE_API_KEY"),
            tavily_api_key: crate::config::resolve_credential("TAVILY_API_KEY"),
        }
    }
}

impl Default for HttpMemoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip non-content tags, flatten the remaining text, and collapse
/// whitespace -- the "plain text" reduction for `url` sources.
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let body_selector = Selector::parse("body").unwrap_or_else(|_| Selector::parse("html").unwrap());
    let skip: std::collections::HashSet<&str> = STRIPPED_TAGS.iter().copied().collect();

    let mut text = String::new();
    if let Some(body) = document.select(&body_selector).next() {
        collect_text(&body, &skip, &mut text);
    } else {
        collect_text(&document.root_element(), &skip, &mut text);
    }

    let collapsed: Vec<&str> = text.split_whitespace().collect();
    let mut joined = collapsed.join(" ");
    joined.truncate(MAX_FETCHED_CHARS.min(joined.len()));
    joined
}

fn collect_text(
    node: &scraper::ElementRef,
    skip: &std::collections::HashSet<&str>,
    out: &mut String,
) {
    for child in node.children() {
        match child.value() {
            scraper::Node::Element(el) => {
                if skip.contains(el.name()) {
                    continue;
                }
                if let Some(child_el) = scraper::ElementRef::wrap(child) {
                    collect_text(&child_el, skip, out);
                }
            }
            scraper::Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            _ => {}
        }
    }
}

impl MemoryFetcher for HttpMemoryFetcher {
    fn fetch_url<'a>(
        &'a self,
        url: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, MemoryError>> + Send + 'a>>
    {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| MemoryError::UrlFetch(format!("request to '{url}' failed: {e}")))?;

            if !response.status().is_success() {
                return Err(MemoryError::UrlFetch(format!(
                    "'{url}' returned status {}",
                    response.status()
                )));
            }

            let body = response
                .text()
                .await
                .map_err(|e| MemoryError::UrlFetch(format!("reading body of '{url}' failed: {e}")))?;

            Ok(html_to_text(&body))
        })
    }

    fn web_search<'a>(
        &'a self,
        query: &'a str,
        max_results: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<String>, MemoryError>> + Send + 'a>>
    {
        Box::pin(async move {
            if let Some(key) = &self.brave_api_key {
                return self.brave_search(key, query, max_results).await;
            }
            if let Some(key) = &self.tavily_api_key {
                return self.tavily_search(key, query, max_results).await;
            }
            Err(MemoryError::WebSearch(
                "no web search provider configured (set BRAVE_API_KEY or TAVILY_API_KEY)".to_string(),
            ))
        })
    }
}

impl HttpMemoryFetcher {
    async fn brave_search(
        &self,
        api_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>, MemoryError> {
        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query), ("count", &max_results.to_string())])
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| MemoryError::WebSearch(format!("brave search request failed: {e}")))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MemoryError::WebSearch(format!("brave search response invalid: {e}")))?;

        let results = body["web"]["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(max_results)
                    .filter_map(|item| {
                        let title = item["title"].as_str().unwrap_or_default();
                        let description = item["description"].as_str().unwrap_or_default();
                        let url = item["url"].as_str().unwrap_or_default();
                        if title.is_empty() && url.is_empty() {
                            None
                        } else {
                            Some(format!("{title}\n{url}\n{description}"))
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(results)
    }

    async fn tavily_search(
        &self,
        api_key: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>, MemoryError> {
        let response = self
            .client
            .post("https://api.tavily.com/search")
            .timeout(Duration::from_secs(15))
            .json(&serde_json::json!({
                "api_key": api_key,
                "query": query,
                "max_results": max_results,
            }))
            .send()
            .await
            .map_err(|e| MemoryError::WebSearch(format!("tavily search request failed: {e}")))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MemoryError::WebSearch(format!("tavily search response invalid: {e}")))?;

        let results = body["results"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(max_results)
                    .filter_map(|item| {
                        let title = item["title"].as_str().unwrap_or_default();
                        let content = item["content"].as_str().unwrap_or_default();
                        let url = item["url"].as_str().unwrap_or_default();
                        if title.is_empty() && url.is_empty() {
                            None
                        } else {
                            Some(format!("{title}\n{url}\n{content}"))
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_text_strips_script_and_style() {
        let html = "<html><body><script>alert(1)</script><style>.x{}</style><p>Hello world</p></body></html>";
        let text = html_to_text(html);
        assert_eq!(text.trim(), "Hello world");
    }

    #[test]
    fn html_to_text_collapses_whitespace() {
        let html = "<html><body><p>Hello   \n\n  world</p></body></html>";
        let text = html_to_text(html);
        assert_eq!(text.trim(), "Hello world");
    }

    #[test]
    fn html_to_text_truncates_to_max_chars() {
        let long = "word ".repeat(5000);
        let html = format!("<html><body><p>{long}</p></body></html>");
        let text = html_to_text(&html);
        assert!(text.len() <= MAX_FETCHED_CHARS);
    }

    #[tokio::test]
    async fn web_search_without_credentials_errors() {
        std::env::remove_var("BRAVE_API_KEY");
        std::env::remove_var("TAVILY_API_KEY");
        let fetcher = HttpMemoryFetcher::new();
        let result = fetcher.web_search("rust async traits", 3).await;
        assert!(result.is_err());
    }
}

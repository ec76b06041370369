//! `web_search` – read-only queries against the DuckDuckGo Instant Answer
//! API.
//!
//! Only `GET` requests are issued and nothing but the query leaves the
//! process.  The base URL is configurable so tests and mirrors can stand in
//! for the public endpoint.

use std::time::Duration;

use async_trait::async_trait;
use aixi_types::SubEnvKind;
use serde::Deserialize;
use tracing::debug;

use crate::subenv::{SubEnvError, SubEnvironment, parse_input};

pub const DEFAULT_SEARCH_URL: &str = "https://api.duckduckgo.com/";
const DEFAULT_MAX_RESULTS: i64 = 5;
const SIMPLE_MAX_RESULTS: usize = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const DOCS: &str = r#"
WEB SEARCH SUBENVIRONMENT

This subenvironment provides web search capabilities using DuckDuckGo.

INPUT FORMAT (JSON):
{
    "query": "search terms",
    "max_results": 5,  // optional, default 5, max 10
    "simple": false    // optional, use simplified output format
}

FEATURES:
- Searches using DuckDuckGo Instant Answer API
- Returns abstracts, definitions, related topics, and direct answers
- Configurable number of results (1-10)
- Simple mode for concise results

EXAMPLES:
{"query": "artificial intelligence definition"}
{"query": "Rust programming tutorial", "max_results": 3}
{"query": "weather forecast", "simple": true}
{"query": "AIXI algorithm Marcus Hutter"}

NOTES:
- Results may vary based on query specificity
- Some queries may return no results if too specific
"#;

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    max_results: Option<i64>,
    #[serde(default)]
    simple: bool,
}

/// Subset of the Instant Answer response the observation is built from.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default, rename = "Abstract")]
    abstract_: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default)]
    abstract_source: String,
    #[serde(default, rename = "AbstractURL")]
    abstract_url: String,
    #[serde(default)]
    definition: String,
    #[serde(default)]
    definition_source: String,
    #[serde(default, rename = "DefinitionURL")]
    definition_url: String,
    #[serde(default)]
    related_topics: Vec<serde_json::Value>,
    #[serde(default)]
    answer: serde_json::Value,
    #[serde(default)]
    answer_type: String,
}

#[derive(Debug, Clone, PartialEq)]
struct SearchHit {
    kind: &'static str,
    title: String,
    content: String,
    source: String,
    url: String,
}

fn or_default(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Flatten an Instant Answer into ordered hits: abstract, definition,
/// related topics (at most `max_results`), answer.
fn collect_hits(answer: &InstantAnswer, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    if !answer.abstract_.is_empty() {
        hits.push(SearchHit {
            kind: "Abstract",
            title: or_default(&answer.abstract_text, "Summary"),
            content: answer.abstract_.clone(),
            source: or_default(&answer.abstract_source, "DuckDuckGo"),
            url: answer.abstract_url.clone(),
        });
    }
    if !answer.definition.is_empty() {
        hits.push(SearchHit {
            kind: "Definition",
            title: "Definition".to_string(),
            content: answer.definition.clone(),
            source: or_default(&answer.definition_source, "DuckDuckGo"),
            url: answer.definition_url.clone(),
        });
    }
    for topic in answer.related_topics.iter().take(max_results) {
        let Some(text) = topic.get("Text").and_then(|t| t.as_str()) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        let title = match text.split_once(" - ") {
            Some((head, _)) => head.to_string(),
            None => "Related".to_string(),
        };
        hits.push(SearchHit {
            kind: "Related Topic",
            title,
            content: text.to_string(),
            source: "DuckDuckGo".to_string(),
            url: topic
                .get("FirstURL")
                .and_then(|u| u.as_str())
                .unwrap_or_default()
                .to_string(),
        });
    }
    if let Some(text) = answer.answer.as_str().filter(|s| !s.is_empty()) {
        hits.push(SearchHit {
            kind: "Answer",
            title: or_default(&answer.answer_type, "Answer"),
            content: text.to_string(),
            source: "DuckDuckGo".to_string(),
            url: String::new(),
        });
    }
    hits
}

fn format_hits(query: &str, hits: &[SearchHit], max_results: usize, simple: bool) -> String {
    if hits.is_empty() {
        return format!(
            "SUCCESS: Search completed for '{query}' but no results found. Try a different query."
        );
    }
    let mut out = vec![format!("SUCCESS: Search results for '{query}':\n")];
    let limit = if simple {
        SIMPLE_MAX_RESULTS.min(max_results)
    } else {
        max_results
    };
    for (i, hit) in hits.iter().take(limit).enumerate() {
        out.push(format!("{}. [{}] {}", i + 1, hit.kind, hit.title));
        out.push(format!("   Content: {}", hit.content));
        if simple {
            continue;
        }
        if !hit.url.is_empty() {
            out.push(format!("   URL: {}", hit.url));
        }
        out.push(format!("   Source: {}", hit.source));
        out.push(String::new());
    }
    out.join("\n")
}

/// Web search backed by an Instant Answer endpoint.
pub struct WebSearchEnv {
    base_url: String,
    client: reqwest::Client,
}

impl WebSearchEnv {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SubEnvError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("aixi/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SubEnvError::Failed(format!("could not build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    async fn search(&self, query: &str) -> Result<InstantAnswer, SubEnvError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubEnvError::Failed(format!("Search request timed out for query '{query}'"))
                } else {
                    SubEnvError::Failed(format!("Network error during search for '{query}': {e}"))
                }
            })?
            .error_for_status()
            .map_err(|e| SubEnvError::Failed(format!("Search failed for query '{query}': {e}")))?;
        response.json::<InstantAnswer>().await.map_err(|_| {
            SubEnvError::Failed(format!(
                "Invalid response format from search API for query '{query}'"
            ))
        })
    }
}

#[async_trait]
impl SubEnvironment for WebSearchEnv {
    fn kind(&self) -> SubEnvKind {
        SubEnvKind::WebSearch
    }

    fn description(&self) -> &str {
        "Web search using DuckDuckGo API"
    }

    fn docs(&self) -> &str {
        DOCS
    }

    async fn execute(&self, input: &str) -> Result<String, SubEnvError> {
        let req: SearchRequest = parse_input(input)?;
        let query = req.query.trim();
        if query.is_empty() {
            return Err(SubEnvError::InvalidInput(
                "'query' field is required and cannot be empty".into(),
            ));
        }
        let max_results = req.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        if !(1..=10).contains(&max_results) {
            return Err(SubEnvError::InvalidInput(
                "'max_results' must be an integer between 1 and 10".into(),
            ));
        }
        let max_results = max_results as usize;
        debug!(query, max_results, simple = req.simple, "web_search request");

        let answer = self.search(query).await?;
        let hits = collect_hits(&answer, max_results);
        Ok(format_hits(query, &hits, max_results, req.simple))
    }
}

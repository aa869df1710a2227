//! DuckDuckGo instant-answer adapter for the Web Search port.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::WebSearch;
use crate::config::SearchSettings;

/// Returned when the search produced no usable text
pub const NO_RESULTS: &str = "No good DuckDuckGo Search Result was found";

/// DuckDuckGo instant-answer client
pub struct DuckDuckGoSearch {
    endpoint: String,
    max_results: usize,
    client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "Answer", default)]
    answer: serde_json::Value,

    #[serde(rename = "AbstractText", default)]
    abstract_text: String,

    #[serde(rename = "Definition", default)]
    definition: String,

    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

/// Either a topic with text, or a named group of topics
#[derive(Debug, Default, Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: Option<String>,

    #[serde(rename = "Topics", default)]
    topics: Vec<RelatedTopic>,
}

impl DuckDuckGoSearch {
    pub fn new(settings: &SearchSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .user_agent(concat!("corrag/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for web search")?;

        Ok(Self {
            endpoint: settings.endpoint.clone(),
            max_results: settings.max_results,
            client,
        })
    }
}

/// Flatten an instant answer into plain text, best snippets first
fn summarize(answer: &InstantAnswer, max_results: usize) -> String {
    let mut snippets: Vec<&str> = Vec::new();

    if let Some(text) = answer.answer.as_str() {
        snippets.push(text);
    }
    snippets.push(&answer.abstract_text);
    snippets.push(&answer.definition);

    let mut stack: Vec<&RelatedTopic> = answer.related_topics.iter().rev().collect();
    while let Some(topic) = stack.pop() {
        if let Some(text) = &topic.text {
            snippets.push(text);
        }
        stack.extend(topic.topics.iter().rev());
    }

    let parts: Vec<&str> = snippets
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(max_results.max(1))
        .collect();

    if parts.is_empty() {
        NO_RESULTS.to_string()
    } else {
        parts.join("\n")
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> Result<String> {
        debug!(%query, "Running web search");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .context("Failed to reach DuckDuckGo")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("DuckDuckGo search failed with status {}", status);
        }

        // The API answers with `application/x-javascript`, so decode by hand
        let body = response
            .text()
            .await
            .context("Failed to read DuckDuckGo response")?;
        let answer: InstantAnswer = if body.trim().is_empty() {
            InstantAnswer::default()
        } else {
            serde_json::from_str(&body).context("Failed to parse DuckDuckGo response")?
        };

        Ok(summarize(&answer, self.max_results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_orders_and_flattens() {
        let body = r#"{
            "Answer": "",
            "AbstractText": "Rust is a systems programming language.",
            "Definition": "",
            "RelatedTopics": [
                {"Text": "Rust (programming language) - memory safety", "FirstURL": "https://duckduckgo.com/a"},
                {"Name": "Tools", "Topics": [
                    {"Text": "Cargo - package manager"},
                    {"Text": "Clippy - linter"}
                ]},
                {"Text": "Ferris - mascot"}
            ]
        }"#;
        let answer: InstantAnswer = serde_json::from_str(body).unwrap();

        let text = summarize(&answer, 4);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Rust is a systems programming language.",
                "Rust (programming language) - memory safety",
                "Cargo - package manager",
                "Clippy - linter",
            ]
        );
    }

    #[test]
    fn test_summarize_empty_answer() {
        let answer: InstantAnswer = serde_json::from_str(r#"{"Answer": {"from": "calc"}}"#).unwrap();
        assert_eq!(summarize(&answer, 5), NO_RESULTS);
        assert_eq!(summarize(&InstantAnswer::default(), 5), NO_RESULTS);
    }

    #[test]
    fn test_direct_answer_comes_first() {
        let answer: InstantAnswer =
            serde_json::from_str(r#"{"Answer": "42", "AbstractText": "Context"}"#).unwrap();
        assert_eq!(summarize(&answer, 5), "42\nContext");
    }
}

//! Documents moved between the retriever, search, grading and generation steps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata key holding where a document came from
pub const SOURCE_KEY: &str = "source";

/// Source value used for documents synthesized from a web search
pub const WEB_SEARCH_SOURCE: &str = "web_search";

/// A passage of text with optional source metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// The passage text
    pub content: String,

    /// Free-form metadata (source path, chunk index, query, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Create a document with no metadata
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Wrap a web search result as a single synthetic document
    pub fn from_web_search(query: &str, result: impl Into<String>) -> Self {
        Self::new(result)
            .with_metadata(SOURCE_KEY, WEB_SEARCH_SOURCE)
            .with_metadata("query", query)
    }

    /// Where this document came from, if recorded
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }

    /// The first `max_chars` characters of the content
    pub fn excerpt(&self, max_chars: usize) -> &str {
        truncate_chars(&self.content, max_chars)
    }
}

/// Join document contents in order with `separator` between them
pub fn join_contents(documents: &[Document], separator: &str) -> String {
    documents
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Truncate to at most `max_chars` characters, never splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

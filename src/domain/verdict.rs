//! Strict decoding of structured classifier verdicts.
//!
//! The classifier is asked for a single JSON object. Whatever comes back is
//! decoded into a typed schema or reported as [`Verdict::Invalid`]; each
//! call site decides its own fallback.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Result of decoding classifier output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    Valid(T),
    Invalid,
}

impl<T> Verdict<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Map a valid verdict, keeping `Invalid` as is
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Verdict<U> {
        match self {
            Self::Valid(value) => Verdict::Valid(f(value)),
            Self::Invalid => Verdict::Invalid,
        }
    }

    /// The verdict, or the call site's fallback
    pub fn unwrap_or(self, fallback: T) -> T {
        match self {
            Self::Valid(value) => value,
            Self::Invalid => fallback,
        }
    }
}

/// Decode the span of `raw` from its first `{` to its last `}` into `T`.
///
/// Models in JSON mode still wrap objects in prose or code fences. Two
/// separate objects in one reply make the span invalid JSON, so the reply
/// is `Invalid`.
pub fn parse_verdict<T: DeserializeOwned>(raw: &str) -> Verdict<T> {
    let trimmed = raw.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };

    match serde_json::from_str(candidate) {
        Ok(value) => Verdict::Valid(value),
        Err(_) => Verdict::Invalid,
    }
}

/// A yes/no answer, case-insensitive on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binary {
    Yes,
    No,
}

impl Binary {
    pub fn is_yes(&self) -> bool {
        matches!(self, Self::Yes)
    }
}

impl<'de> Deserialize<'de> for Binary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            other => Err(serde::de::Error::custom(format!(
                "expected \"yes\" or \"no\", got \"{}\"",
                other
            ))),
        }
    }
}

/// `{"binary_score": "yes" | "no", "explanation": "..."}`
#[derive(Debug, Clone, Deserialize)]
pub struct BinaryScore {
    pub binary_score: Binary,

    #[serde(default)]
    pub explanation: Option<String>,
}

/// Where a question should be answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datasource {
    #[serde(alias = "vectorstore")]
    KnowledgeBase,

    #[serde(alias = "websearch")]
    WebSearch,
}

/// `{"datasource": "knowledge_base" | "web_search"}`
#[derive(Debug, Clone, Deserialize)]
pub struct RouteQuery {
    pub datasource: Datasource,
}

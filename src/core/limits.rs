//! Limits applied to every workflow run.
//!
//! Bounds the retry loop, how much evidence each grader sees, how many
//! documents a run may accumulate, and what questions are accepted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DEFAULT_MAX_RETRIES;

/// Limits for workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLimits {
    /// Generations allowed beyond the first (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Characters of each document shown to the relevance grader (default: 500)
    #[serde(default = "default_document_excerpt_chars")]
    pub document_excerpt_chars: usize,

    /// Characters of joined evidence shown to the grounding grader (default: 2000)
    #[serde(default = "default_grounding_excerpt_chars")]
    pub grounding_excerpt_chars: usize,

    /// Cap on documents held by a run; unbounded when unset
    #[serde(default)]
    pub max_documents: Option<usize>,

    /// Maximum question size in bytes (default: 16KB)
    #[serde(default = "default_max_question_bytes")]
    pub max_question_bytes: u64,

    /// Frames buffered between a run and its consumer (default: 32)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_document_excerpt_chars() -> usize {
    500
}
fn default_grounding_excerpt_chars() -> usize {
    2000
}
fn default_max_question_bytes() -> u64 {
    16 * 1024
} // 16KB
fn default_event_buffer() -> usize {
    32
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            document_excerpt_chars: default_document_excerpt_chars(),
            grounding_excerpt_chars: default_grounding_excerpt_chars(),
            max_documents: None,
            max_question_bytes: default_max_question_bytes(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl WorkflowLimits {
    /// Validate a question before a run starts
    pub fn validate_question(&self, question: &str) -> Result<(), LimitViolation> {
        if question.trim().is_empty() {
            return Err(LimitViolation::EmptyQuestion);
        }

        let size = question.len() as u64;
        if size > self.max_question_bytes {
            return Err(LimitViolation::QuestionTooLarge {
                actual: size,
                limit: self.max_question_bytes,
            });
        }

        Ok(())
    }
}

/// Limit violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitViolation {
    #[error("Question is empty")]
    EmptyQuestion,

    #[error("Question too large: {actual} > {limit} bytes")]
    QuestionTooLarge { actual: u64, limit: u64 },
}

//! Run state threaded through one traversal of the workflow.
//!
//! A `RunState` is created per question, owned by that run's task for its
//! whole lifetime, and dropped after the terminal event. Fields are private
//! so every mutation goes through the methods below, which carry the merge
//! semantics of each field:
//! - `documents`: replaced by retrieval, appended by web search, filtered
//!   (never reordered or enlarged) by grading
//! - `loop_step`: additive, via [`merge_loop_step`], only on generation
//! - everything else: last write wins

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::Document;
use super::events::{RunEvent, StepLabel};

/// Default ceiling on regeneration attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Reducer for `loop_step`: counters only ever add.
pub fn merge_loop_step(current: u32, delta: u32) -> u32 {
    current.saturating_add(delta)
}

/// Tri-state flag set by document grading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSearchFlag {
    /// Grading has not run
    #[default]
    Unset,

    /// At least one document was judged irrelevant
    Yes,

    /// Every document was judged relevant
    No,
}

/// Mutable record carried through one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    id: Uuid,
    question: String,
    documents: Vec<Document>,
    needs_web_search: WebSearchFlag,
    generation: Option<String>,
    loop_step: u32,
    max_retries: u32,
    started_at: DateTime<Utc>,
}

impl RunState {
    /// Create fresh state for a question
    pub fn new(id: Uuid, question: impl Into<String>, max_retries: u32) -> Self {
        Self {
            id,
            question: question.into(),
            documents: Vec::new(),
            needs_web_search: WebSearchFlag::Unset,
            generation: None,
            loop_step: 0,
            max_retries,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn needs_web_search(&self) -> WebSearchFlag {
        self.needs_web_search
    }

    pub fn generation(&self) -> Option<&str> {
        self.generation.as_deref()
    }

    pub fn loop_step(&self) -> u32 {
        self.loop_step
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Retrieval result: replaces the documents wholesale
    pub fn replace_documents(&mut self, documents: Vec<Document>) {
        self.documents = documents;
    }

    /// Web search result: appends one document.
    ///
    /// With a `cap`, the oldest document is evicted first when the run
    /// already holds `cap` documents; the evicted document is returned.
    pub fn append_document(&mut self, document: Document, cap: Option<usize>) -> Option<Document> {
        let evicted = match cap {
            Some(cap) if cap > 0 && self.documents.len() >= cap => Some(self.documents.remove(0)),
            _ => None,
        };
        self.documents.push(document);
        evicted
    }

    /// Grading result: keep the documents judged relevant, in order.
    ///
    /// `relevant[i]` is the verdict for the i-th current document; a missing
    /// verdict counts as irrelevant. Sets `needs_web_search` to `Yes` when
    /// any document was dropped. Returns the number dropped.
    pub fn apply_relevance(&mut self, relevant: &[bool]) -> usize {
        let before = self.documents.len();
        let mut verdicts = relevant.iter();
        self.documents
            .retain(|_| verdicts.next().copied().unwrap_or(false));

        let dropped = before - self.documents.len();
        self.needs_web_search = if dropped > 0 {
            WebSearchFlag::Yes
        } else {
            WebSearchFlag::No
        };
        dropped
    }

    /// Generation result: stores the answer and counts the attempt
    pub fn record_generation(&mut self, generation: String) {
        self.generation = Some(generation);
        self.loop_step = merge_loop_step(self.loop_step, 1);
    }

    /// True once more than `max_retries` generations have run
    pub fn retries_exhausted(&self) -> bool {
        self.loop_step > self.max_retries
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    /// Grounded and relevant answer
    Accepted { generation: String },

    /// Retry ceiling hit; carries the last, unverified answer
    RetriesExhausted { generation: String },
}

impl RunOutcome {
    pub fn label(&self) -> OutcomeLabel {
        match self {
            Self::Accepted { .. } => OutcomeLabel::Accepted,
            Self::RetriesExhausted { .. } => OutcomeLabel::RetriesExhausted,
        }
    }

    pub fn generation(&self) -> &str {
        match self {
            Self::Accepted { generation } | Self::RetriesExhausted { generation } => generation,
        }
    }

    /// Whether the answer passed both grounding and relevance checks
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Terminal labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeLabel {
    Accepted,
    RetriesExhausted,
}

impl OutcomeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// Status of a recorded run, derived from its transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunStatus {
    /// No final or error event yet
    Running,

    /// Terminal outcome reached
    Finished { outcome: OutcomeLabel },

    /// Run-level error
    Failed { error: String },
}

/// Summary of a recorded run, folded from its events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Route taken at entry (`knowledge_base` / `web_search`)
    pub route: Option<String>,
    /// Number of step events recorded
    pub steps: usize,
    /// Generation attempts made
    pub loop_step: u32,
    /// Final answer, if the run reached a terminal outcome
    pub answer: Option<String>,
}

impl RunSummary {
    /// Reconstruct a summary from a sequence of events
    pub fn from_events(events: &[RunEvent]) -> Option<Self> {
        let first = events.first()?;

        let mut summary = Self {
            run_id: first.run_id,
            status: RunStatus::Running,
            started_at: first.timestamp,
            completed_at: None,
            route: None,
            steps: 0,
            loop_step: 0,
            answer: None,
        };

        for event in events {
            summary.apply_event(event);
        }

        Some(summary)
    }

    /// Apply a single event
    pub fn apply_event(&mut self, event: &RunEvent) {
        self.steps += 1;
        self.loop_step = self.loop_step.max(event.loop_step);

        match event.step {
            StepLabel::Routing => {
                self.route = event.transition.clone();
            }
            StepLabel::Final => {
                if let Some(outcome) = event.outcome {
                    self.status = RunStatus::Finished { outcome };
                }
                self.answer = Some(event.content.clone());
                self.completed_at = Some(event.timestamp);
            }
            StepLabel::Error => {
                self.status = RunStatus::Failed {
                    error: event.error.clone().unwrap_or_else(|| event.content.clone()),
                };
                self.completed_at = Some(event.timestamp);
            }
            StepLabel::Retrieved
            | StepLabel::Searched
            | StepLabel::Graded
            | StepLabel::Generated => {}
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.status, RunStatus::Running)
    }
}

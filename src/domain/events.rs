//! Event records streamed to the caller while a run progresses.
//!
//! One event is emitted per completed workflow step. The stream ends with
//! [`StreamFrame::Done`] after a terminal outcome, or right after an
//! `error` event when the run fails.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::run::{OutcomeLabel, RunOutcome};

/// Payload of the terminal sentinel frame
pub const DONE_SENTINEL: &str = "[DONE]";

/// A single progress record for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When the step completed
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Which step produced the event
    pub step: StepLabel,

    /// Human-readable summary, or the answer text on the final event
    pub content: String,

    /// Documents held by the run after the step
    #[serde(default)]
    pub document_count: usize,

    /// Generation attempts so far
    #[serde(default)]
    pub loop_step: u32,

    /// Edge taken out of the step, when the step is a decision point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<String>,

    /// Terminal label (final event only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeLabel>,

    /// Whether the final answer passed grounding and relevance checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,

    /// Error message (error event only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunEvent {
    /// Create a new event with the current timestamp
    pub fn new(run_id: Uuid, step: StepLabel, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            step,
            content: content.into(),
            document_count: 0,
            loop_step: 0,
            transition: None,
            outcome: None,
            verified: None,
            error: None,
        }
    }

    /// Record run progress counters
    pub fn with_progress(mut self, document_count: usize, loop_step: u32) -> Self {
        self.document_count = document_count;
        self.loop_step = loop_step;
        self
    }

    /// Record the transition label chosen after the step
    pub fn with_transition(mut self, transition: impl Into<String>) -> Self {
        self.transition = Some(transition.into());
        self
    }

    /// Record the terminal outcome
    pub fn with_outcome(mut self, outcome: &RunOutcome) -> Self {
        self.outcome = Some(outcome.label());
        self.verified = Some(outcome.is_verified());
        self
    }

    /// Record an error message
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Step labels exposed on the delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepLabel {
    /// The routing decision was made
    Routing,

    /// Documents were retrieved from the knowledge base
    Retrieved,

    /// A web search result was appended
    Searched,

    /// Documents were graded for relevance
    Graded,

    /// An answer was generated and graded
    Generated,

    /// The run reached a terminal outcome
    Final,

    /// The run failed
    Error,
}

impl StepLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::Retrieved => "retrieved",
            Self::Searched => "searched",
            Self::Graded => "graded",
            Self::Generated => "generated",
            Self::Final => "final",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StepLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frame on the progressive delivery channel
#[derive(Debug, Clone)]
pub enum StreamFrame {
    /// A step completed
    Event(RunEvent),

    /// Terminal sentinel, sent after the final event
    Done,
}

impl StreamFrame {
    /// JSON payload of the frame, or the sentinel text for `Done`
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Event(event) => serde_json::to_string(event),
            Self::Done => Ok(DONE_SENTINEL.to_string()),
        }
    }

    /// Encode as a server-sent-events `data:` record
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", self.payload()?))
    }

    /// The event carried by the frame, if any
    pub fn event(&self) -> Option<&RunEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = RunEvent::new(Uuid::new_v4(), StepLabel::Retrieved, "Retrieved 3 documents")
            .with_progress(3, 0);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""step":"retrieved""#));
        assert!(!json.contains("transition"));

        let parsed: RunEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.step, StepLabel::Retrieved);
        assert_eq!(parsed.document_count, 3);
    }

    #[test]
    fn test_event_with_outcome() {
        let outcome = RunOutcome::RetriesExhausted {
            generation: "best effort".to_string(),
        };
        let event = RunEvent::new(Uuid::new_v4(), StepLabel::Final, outcome.generation())
            .with_outcome(&outcome);

        assert_eq!(event.outcome, Some(OutcomeLabel::RetriesExhausted));
        assert_eq!(event.verified, Some(false));
        assert_eq!(event.content, "best effort");
    }

    #[test]
    fn test_event_with_error() {
        let event = RunEvent::new(Uuid::new_v4(), StepLabel::Error, "Run failed")
            .with_error("retrieve failed: connection refused".to_string());

        assert_eq!(
            event.error,
            Some("retrieve failed: connection refused".to_string())
        );
    }

    #[test]
    fn test_sse_encoding() {
        let event = RunEvent::new(Uuid::new_v4(), StepLabel::Routing, "knowledge_base");
        let frame = StreamFrame::Event(event);

        let sse = frame.to_sse().unwrap();
        assert!(sse.starts_with("data: {"));
        assert!(sse.ends_with("}\n\n"));

        assert_eq!(StreamFrame::Done.to_sse().unwrap(), "data: [DONE]\n\n");
    }
}

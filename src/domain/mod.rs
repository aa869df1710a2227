//! Domain types for the corrag orchestrator.
//!
//! This module contains the core data structures:
//! - Document: Passages moved between steps
//! - RunState: Per-question state threaded through the workflow
//! - Events: Progress records streamed to callers
//! - Verdict: Typed classifier output

pub mod document;
pub mod events;
pub mod run;
pub mod verdict;

// Re-export commonly used types
pub use document::{join_contents, truncate_chars, Document};
pub use events::{RunEvent, StepLabel, StreamFrame, DONE_SENTINEL};
pub use run::{
    merge_loop_step, OutcomeLabel, RunOutcome, RunState, RunStatus, RunSummary, WebSearchFlag,
    DEFAULT_MAX_RETRIES,
};
pub use verdict::{parse_verdict, Binary, BinaryScore, Datasource, RouteQuery, Verdict};

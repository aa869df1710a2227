//! corrag - Self-correcting retrieval-augmented question answering
//!
//! Answers a question by choosing between a private knowledge base and web
//! search, filtering the evidence, generating an answer and checking that
//! answer for grounding and relevance before returning it.
//!
//! # Architecture
//!
//! The workflow is a closed decision graph:
//! - The router picks the knowledge base or web search
//! - Retrieved documents are graded; any irrelevant one adds a web search
//! - Each generation is checked for grounding, then for relevance
//! - Failed checks loop back to generation or web search, bounded by
//!   `max_retries`
//!
//! # Modules
//!
//! - `adapters`: Ports and their HTTP-backed implementations
//! - `core`: Workflow, steps, limits, event sink, run log
//! - `domain`: Data structures (Document, RunState, RunEvent, Verdict)
//! - `knowledge`: Loader, splitter, SQLite vector store
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Index internal documents
//! corrag build ./docs
//!
//! # Ask a question, streaming progress as SSE frames
//! corrag ask "How many vacation days do new hires get?" --format sse
//!
//! # Inspect a recorded run
//! corrag status <run-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod domain;
pub mod knowledge;

// Re-export main types at crate root for convenience
pub use context::AppContext;
pub use core::{EventSink, RunRequest, Workflow, WorkflowError};
pub use domain::{Document, RunEvent, RunOutcome, RunState, StreamFrame};
pub use knowledge::{BuildOutcome, KnowledgeBase};

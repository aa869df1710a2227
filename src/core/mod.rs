//! Core orchestration logic.
//!
//! This module contains:
//! - Workflow: The decision graph and its driver
//! - Steps: Per-step logic and transition labels
//! - Limits: Retry ceiling and input validation
//! - EventSink: Progressive delivery and cancellation
//! - RunLog: Append-only run transcripts

pub mod limits;
pub mod orchestrator;
pub mod prompts;
pub mod run_log;
pub mod sink;
pub mod steps;

// Re-export commonly used types
pub use limits::{LimitViolation, WorkflowLimits};
pub use orchestrator::{Node, RunHandle, RunReport, RunRequest, Workflow, WorkflowError};
pub use run_log::RunLog;
pub use sink::EventSink;
pub use steps::{AfterGeneration, AfterGrading, Ports, Route};

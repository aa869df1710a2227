//! Main orchestrator for workflow execution.
//!
//! Walks the decision graph for one question at a time, emitting an event
//! after every step and enforcing the retry ceiling. Runs share the ports
//! and nothing else.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::limits::{LimitViolation, WorkflowLimits};
use super::sink::EventSink;
use super::steps::{self, AfterGeneration, AfterGrading, Ports, Route};
use crate::adapters::Retriever;
use crate::domain::{RunEvent, RunOutcome, RunState, StepLabel, StreamFrame};

/// Nodes of the workflow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Route,
    Retrieve,
    GradeDocuments,
    WebSearch,
    Generate,
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Route => "route",
            Self::Retrieve => "retrieve",
            Self::GradeDocuments => "grade_documents",
            Self::WebSearch => "web_search",
            Self::Generate => "generate",
        };
        f.write_str(name)
    }
}

/// Run-level errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A port call failed; the run stops without retrying it
    #[error("{step} step failed: {source:#}")]
    Port {
        step: Node,
        #[source]
        source: anyhow::Error,
    },

    #[error("No knowledge base is loaded; run `corrag build` first")]
    KnowledgeBaseUnavailable,

    #[error("Invalid question: {0}")]
    InvalidQuestion(#[from] LimitViolation),

    /// The consumer of the event stream went away
    #[error("Run cancelled")]
    Cancelled,
}

/// A question to answer
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: Uuid,
    pub question: String,
    /// Overrides the configured retry ceiling
    pub max_retries: Option<u32>,
}

impl RunRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            question: question.into(),
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Final state and outcome of a completed run
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub outcome: RunOutcome,
}

/// A run executing on its own task
pub struct RunHandle {
    pub run_id: Uuid,
    /// Dropping this cancels the run
    pub frames: mpsc::Receiver<StreamFrame>,
    pub task: JoinHandle<Result<RunReport, WorkflowError>>,
}

/// Adaptive retrieval workflow
pub struct Workflow {
    ports: Ports,
    limits: WorkflowLimits,
}

impl Workflow {
    pub fn new(ports: Ports, limits: WorkflowLimits) -> Self {
        Self { ports, limits }
    }

    /// Same ports and limits with a different retriever
    pub fn with_retriever(&self, retriever: Option<Arc<dyn Retriever>>) -> Self {
        Self {
            ports: Ports {
                retriever,
                ..self.ports.clone()
            },
            limits: self.limits.clone(),
        }
    }

    pub fn limits(&self) -> &WorkflowLimits {
        &self.limits
    }

    pub fn has_retriever(&self) -> bool {
        self.ports.retriever.is_some()
    }

    /// Answer a question without streaming progress
    pub async fn ask(&self, question: impl Into<String>) -> Result<RunReport, WorkflowError> {
        self.execute(RunRequest::new(question), &EventSink::detached())
            .await
    }

    /// Start a run on a new task and hand back its event stream
    pub fn spawn(self: &Arc<Self>, request: RunRequest) -> RunHandle {
        let (sink, frames) = EventSink::channel(self.limits.event_buffer);
        let run_id = request.run_id;
        let workflow = Arc::clone(self);

        let task = tokio::spawn(async move { workflow.execute(request, &sink).await });

        RunHandle {
            run_id,
            frames,
            task,
        }
    }

    /// Execute one run, delivering events to `sink`.
    ///
    /// On success the stream carries a `final` event followed by the done
    /// sentinel. On failure it carries an `error` event and no sentinel.
    #[instrument(skip(self, request, sink), fields(run_id = %request.run_id))]
    pub async fn execute(
        &self,
        request: RunRequest,
        sink: &EventSink,
    ) -> Result<RunReport, WorkflowError> {
        if let Err(violation) = self.limits.validate_question(&request.question) {
            let err = WorkflowError::from(violation);
            self.report_failure(request.run_id, 0, 0, &err, sink).await;
            return Err(err);
        }

        let max_retries = request.max_retries.unwrap_or(self.limits.max_retries);
        let mut state = RunState::new(request.run_id, request.question, max_retries);
        info!(max_retries, "Starting run");

        let outcome = match self.drive(&mut state, sink).await {
            Ok(outcome) => outcome,
            Err(WorkflowError::Cancelled) => {
                info!(loop_step = state.loop_step(), "Run cancelled by consumer");
                return Err(WorkflowError::Cancelled);
            }
            Err(err) => {
                self.report_failure(
                    state.id(),
                    state.documents().len(),
                    state.loop_step(),
                    &err,
                    sink,
                )
                .await;
                return Err(err);
            }
        };

        let event = progress(&state, StepLabel::Final, outcome.generation())
            .with_transition(outcome.label().as_str())
            .with_outcome(&outcome);
        sink.emit(event).await?;
        sink.finish().await?;

        info!(
            outcome = outcome.label().as_str(),
            loop_step = state.loop_step(),
            "Run finished"
        );

        Ok(RunReport { state, outcome })
    }

    /// Walk the graph from the router to a terminal outcome
    async fn drive(
        &self,
        state: &mut RunState,
        sink: &EventSink,
    ) -> Result<RunOutcome, WorkflowError> {
        let mut node = Node::Route;

        loop {
            debug!(%node, loop_step = state.loop_step(), "Entering node");

            node = match node {
                Node::Route => {
                    let route = steps::route(&self.ports, state, sink).await?;
                    info!(route = route.label(), "Routed question");

                    let event = progress(state, StepLabel::Routing, format!("Routed to {}", route.label()))
                        .with_transition(route.label());
                    sink.emit(event).await?;

                    match route {
                        Route::KnowledgeBase => Node::Retrieve,
                        Route::WebSearch => Node::WebSearch,
                    }
                }

                Node::Retrieve => {
                    let count = steps::retrieve(&self.ports, state, sink).await?;
                    sink.emit(progress(
                        state,
                        StepLabel::Retrieved,
                        format!("Retrieved {} documents", count),
                    ))
                    .await?;
                    Node::GradeDocuments
                }

                Node::GradeDocuments => {
                    let before = state.documents().len();
                    let next = steps::grade_documents(&self.ports, state, &self.limits, sink).await?;

                    let content = format!(
                        "Kept {} of {} documents",
                        state.documents().len(),
                        before
                    );
                    sink.emit(progress(state, StepLabel::Graded, content).with_transition(next.label()))
                        .await?;

                    match next {
                        AfterGrading::WebSearch => Node::WebSearch,
                        AfterGrading::Generate => Node::Generate,
                    }
                }

                Node::WebSearch => {
                    let count = steps::web_search(&self.ports, state, &self.limits, sink).await?;
                    sink.emit(progress(
                        state,
                        StepLabel::Searched,
                        format!("Added web search result ({} documents)", count),
                    ))
                    .await?;
                    Node::Generate
                }

                Node::Generate => {
                    steps::generate(&self.ports, state, sink).await?;
                    let next = steps::grade_generation(&self.ports, state, &self.limits, sink).await?;

                    let generation = state.generation().unwrap_or_default().to_string();
                    sink.emit(
                        progress(state, StepLabel::Generated, generation.clone())
                            .with_transition(next.label()),
                    )
                    .await?;

                    match next {
                        AfterGeneration::Accepted => {
                            return Ok(RunOutcome::Accepted { generation });
                        }
                        AfterGeneration::RetriesExhausted => {
                            return Ok(RunOutcome::RetriesExhausted { generation });
                        }
                        AfterGeneration::Regenerate => Node::Generate,
                        AfterGeneration::Resupply => Node::WebSearch,
                    }
                }
            };
        }
    }

    /// Log a run-level error and tell the consumer, if it is still there
    async fn report_failure(
        &self,
        run_id: Uuid,
        document_count: usize,
        loop_step: u32,
        err: &WorkflowError,
        sink: &EventSink,
    ) {
        error!(error = %err, "Run failed");

        let event = RunEvent::new(run_id, StepLabel::Error, format!("Run failed: {}", err))
            .with_progress(document_count, loop_step)
            .with_error(err.to_string());

        if sink.emit(event).await.is_err() {
            debug!("Consumer left before the error event was delivered");
        }
    }
}

/// Event carrying the run's current counters
fn progress(state: &RunState, step: StepLabel, content: impl Into<String>) -> RunEvent {
    RunEvent::new(state.id(), step, content).with_progress(state.documents().len(), state.loop_step())
}

//! Per-step logic of the workflow.
//!
//! Each step reads the run state, makes its port calls, and only then
//! commits the result to the state, so a cancelled or failed call leaves
//! the state untouched. Decision steps return a closed transition enum.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::limits::WorkflowLimits;
use super::orchestrator::{Node, WorkflowError};
use super::prompts::{
    answer_prompt, doc_grader_prompt, hallucination_prompt, rag_prompt, router_prompt,
    ANSWER_GRADER_INSTRUCTIONS, DOC_GRADER_INSTRUCTIONS, HALLUCINATION_GRADER_INSTRUCTIONS,
    ROUTER_INSTRUCTIONS,
};
use super::sink::EventSink;
use crate::adapters::{Classifier, Generator, Retriever, WebSearch};
use crate::domain::{
    join_contents, parse_verdict, truncate_chars, BinaryScore, Datasource, Document, RouteQuery,
    RunState, Verdict, WebSearchFlag,
};

/// The ports a workflow runs against
#[derive(Clone)]
pub struct Ports {
    pub classifier: Arc<dyn Classifier>,
    pub generator: Arc<dyn Generator>,
    /// Absent until a knowledge base has been built or loaded
    pub retriever: Option<Arc<dyn Retriever>>,
    pub web_search: Arc<dyn WebSearch>,
}

/// Entry edge chosen by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    KnowledgeBase,
    WebSearch,
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Self::KnowledgeBase => "knowledge_base",
            Self::WebSearch => "web_search",
        }
    }
}

/// Edge out of document grading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterGrading {
    WebSearch,
    Generate,
}

impl AfterGrading {
    pub fn label(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::Generate => "generate",
        }
    }
}

/// Edge out of post-generation grading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterGeneration {
    /// Terminal: grounded and answers the question
    Accepted,
    /// Terminal: retry ceiling reached
    RetriesExhausted,
    /// Not grounded; generate again over the same documents
    Regenerate,
    /// Grounded but off-target; gather more evidence first
    Resupply,
}

impl AfterGeneration {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Regenerate => "regenerate",
            Self::Resupply => "resupply",
        }
    }
}

/// Await a port call on behalf of `step`, abandoning it if the consumer left
async fn call<T>(
    sink: &EventSink,
    step: Node,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, WorkflowError> {
    sink.guard(fut)
        .await?
        .map_err(|source| WorkflowError::Port { step, source })
}

/// Ask the classifier a yes/no question; `None` when the verdict is unusable
async fn binary_check(
    ports: &Ports,
    sink: &EventSink,
    step: Node,
    instructions: &str,
    prompt: &str,
) -> Result<Option<bool>, WorkflowError> {
    let raw = call(sink, step, ports.classifier.classify(instructions, prompt)).await?;
    Ok(match parse_verdict::<BinaryScore>(&raw) {
        Verdict::Valid(score) => Some(score.binary_score.is_yes()),
        Verdict::Invalid => None,
    })
}

/// Pick the entry edge. Unusable verdicts fall back to the knowledge base.
pub async fn route(
    ports: &Ports,
    state: &RunState,
    sink: &EventSink,
) -> Result<Route, WorkflowError> {
    let raw = call(
        sink,
        Node::Route,
        ports
            .classifier
            .classify(ROUTER_INSTRUCTIONS, &router_prompt(state.question())),
    )
    .await?;

    let route = match parse_verdict::<RouteQuery>(&raw) {
        Verdict::Valid(query) => match query.datasource {
            Datasource::KnowledgeBase => Route::KnowledgeBase,
            Datasource::WebSearch => Route::WebSearch,
        },
        Verdict::Invalid => {
            warn!(
                raw = %truncate_chars(&raw, 200),
                "Unusable routing verdict, falling back to knowledge_base"
            );
            Route::KnowledgeBase
        }
    };

    Ok(route)
}

/// Replace the run's documents with the retriever's top matches
pub async fn retrieve(
    ports: &Ports,
    state: &mut RunState,
    sink: &EventSink,
) -> Result<usize, WorkflowError> {
    let retriever = ports
        .retriever
        .as_ref()
        .ok_or(WorkflowError::KnowledgeBaseUnavailable)?;

    let documents = call(sink, Node::Retrieve, retriever.retrieve(state.question())).await?;
    info!(count = documents.len(), "Retrieved documents");

    state.replace_documents(documents);
    Ok(state.documents().len())
}

/// Append one synthetic document holding the web search result
pub async fn web_search(
    ports: &Ports,
    state: &mut RunState,
    limits: &WorkflowLimits,
    sink: &EventSink,
) -> Result<usize, WorkflowError> {
    let result = call(sink, Node::WebSearch, ports.web_search.search(state.question())).await?;
    let document = Document::from_web_search(state.question(), result);

    if let Some(evicted) = state.append_document(document, limits.max_documents) {
        debug!(
            source = evicted.source().unwrap_or("unknown"),
            "Evicted oldest document to stay under max_documents"
        );
    }

    info!(count = state.documents().len(), "Added web search result");
    Ok(state.documents().len())
}

/// Keep only the documents judged relevant.
///
/// Every document is graded before the state changes. An unusable verdict
/// counts as "not relevant"; dropping any document routes to web search.
pub async fn grade_documents(
    ports: &Ports,
    state: &mut RunState,
    limits: &WorkflowLimits,
    sink: &EventSink,
) -> Result<AfterGrading, WorkflowError> {
    let mut relevant = Vec::with_capacity(state.documents().len());

    for (index, document) in state.documents().iter().enumerate() {
        let prompt = doc_grader_prompt(
            document.excerpt(limits.document_excerpt_chars),
            state.question(),
        );
        let verdict = binary_check(
            ports,
            sink,
            Node::GradeDocuments,
            DOC_GRADER_INSTRUCTIONS,
            &prompt,
        )
        .await?;

        relevant.push(verdict.unwrap_or_else(|| {
            warn!(index, "Unusable relevance verdict, treating document as not relevant");
            false
        }));
    }

    let dropped = state.apply_relevance(&relevant);
    info!(
        kept = state.documents().len(),
        dropped, "Graded documents"
    );

    Ok(match state.needs_web_search() {
        WebSearchFlag::Yes => AfterGrading::WebSearch,
        WebSearchFlag::No | WebSearchFlag::Unset => AfterGrading::Generate,
    })
}

/// Answer the question from the current documents and count the attempt
pub async fn generate(
    ports: &Ports,
    state: &mut RunState,
    sink: &EventSink,
) -> Result<(), WorkflowError> {
    let context = join_contents(state.documents(), "\n\n");
    let prompt = rag_prompt(&context, state.question());

    let generation = call(sink, Node::Generate, ports.generator.generate(&prompt)).await?;
    state.record_generation(generation);

    info!(loop_step = state.loop_step(), "Generated answer");
    Ok(())
}

/// Decide what follows a generation.
///
/// The retry ceiling is checked before any grading call. An unusable
/// grounding verdict regenerates; an unusable relevance verdict resupplies.
pub async fn grade_generation(
    ports: &Ports,
    state: &RunState,
    limits: &WorkflowLimits,
    sink: &EventSink,
) -> Result<AfterGeneration, WorkflowError> {
    if state.retries_exhausted() {
        warn!(
            loop_step = state.loop_step(),
            max_retries = state.max_retries(),
            "Retry ceiling reached, returning unverified answer"
        );
        return Ok(AfterGeneration::RetriesExhausted);
    }

    let generation = state.generation().unwrap_or_default();
    let evidence = join_contents(state.documents(), "\n");
    let facts = truncate_chars(&evidence, limits.grounding_excerpt_chars);

    let grounded = binary_check(
        ports,
        sink,
        Node::Generate,
        HALLUCINATION_GRADER_INSTRUCTIONS,
        &hallucination_prompt(facts, generation),
    )
    .await?;

    match grounded {
        Some(true) => {}
        Some(false) => {
            info!("Answer not grounded in documents, regenerating");
            return Ok(AfterGeneration::Regenerate);
        }
        None => {
            warn!("Unusable grounding verdict, regenerating");
            return Ok(AfterGeneration::Regenerate);
        }
    }

    let answers = binary_check(
        ports,
        sink,
        Node::Generate,
        ANSWER_GRADER_INSTRUCTIONS,
        &answer_prompt(state.question(), generation),
    )
    .await?;

    Ok(match answers {
        Some(true) => AfterGeneration::Accepted,
        Some(false) => {
            info!("Answer does not resolve the question, searching for more evidence");
            AfterGeneration::Resupply
        }
        None => {
            warn!("Unusable answer verdict, searching for more evidence");
            AfterGeneration::Resupply
        }
    })
}

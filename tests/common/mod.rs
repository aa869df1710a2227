//! Scripted in-memory ports shared by the integration suites.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use corrag::adapters::{Classifier, Embedder, Generator, Retriever, WebSearch};
use corrag::core::prompts::{
    ANSWER_GRADER_INSTRUCTIONS, DOC_GRADER_INSTRUCTIONS, HALLUCINATION_GRADER_INSTRUCTIONS,
    ROUTER_INSTRUCTIONS,
};
use corrag::core::{Ports, Workflow, WorkflowLimits};
use corrag::domain::Document;

/// The four classifier call sites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Route,
    Relevance,
    Grounding,
    Answer,
}

impl Task {
    fn from_instructions(instructions: &str) -> Option<Self> {
        match instructions {
            ROUTER_INSTRUCTIONS => Some(Self::Route),
            DOC_GRADER_INSTRUCTIONS => Some(Self::Relevance),
            HALLUCINATION_GRADER_INSTRUCTIONS => Some(Self::Grounding),
            ANSWER_GRADER_INSTRUCTIONS => Some(Self::Answer),
            _ => None,
        }
    }

    /// Reply used once the script for this task runs out
    fn default_reply(&self) -> String {
        match self {
            Self::Route => route_reply("knowledge_base"),
            _ => score(true),
        }
    }
}

pub fn score(yes: bool) -> String {
    format!(
        r#"{{"binary_score": "{}", "explanation": "scripted"}}"#,
        if yes { "yes" } else { "no" }
    )
}

pub fn route_reply(datasource: &str) -> String {
    format!(r#"{{"datasource": "{}"}}"#, datasource)
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail,
}

/// Classifier answering from per-task queues, "yes"/knowledge_base when empty
#[derive(Default)]
pub struct ScriptedClassifier {
    scripts: Mutex<HashMap<Task, VecDeque<Reply>>>,
    calls: Mutex<HashMap<Task, usize>>,
}

impl ScriptedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, task: Task, reply: Reply) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(task)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn raw(self, task: Task, text: &str) -> Self {
        self.push(task, Reply::Text(text.to_string()))
    }

    pub fn fail(self, task: Task) -> Self {
        self.push(task, Reply::Fail)
    }

    pub fn route(self, datasource: &str) -> Self {
        self.raw(Task::Route, &route_reply(datasource))
    }

    pub fn relevance(self, verdicts: &[bool]) -> Self {
        verdicts
            .iter()
            .fold(self, |s, v| s.raw(Task::Relevance, &score(*v)))
    }

    pub fn grounding(self, verdicts: &[bool]) -> Self {
        verdicts
            .iter()
            .fold(self, |s, v| s.raw(Task::Grounding, &score(*v)))
    }

    pub fn answer(self, verdicts: &[bool]) -> Self {
        verdicts
            .iter()
            .fold(self, |s, v| s.raw(Task::Answer, &score(*v)))
    }

    pub fn calls(&self, task: Task) -> usize {
        self.calls.lock().unwrap().get(&task).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, instructions: &str, _prompt: &str) -> Result<String> {
        let task = Task::from_instructions(instructions)
            .ok_or_else(|| anyhow::anyhow!("unexpected classifier instructions"))?;
        *self.calls.lock().unwrap().entry(task).or_default() += 1;

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&task)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail) => anyhow::bail!("classifier unavailable"),
            None => Ok(task.default_reply()),
        }
    }
}

/// Generator returning "answer N" for the N-th call
#[derive(Default)]
pub struct CountingGenerator {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for CountingGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            anyhow::bail!("model timed out");
        }
        Ok(format!("answer {}", n))
    }
}

/// Generator that never finishes in test time
#[derive(Default)]
pub struct SlowGenerator {
    pub started: AtomicBool,
    pub finished: AtomicBool,
}

#[async_trait]
impl Generator for SlowGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok("too late".to_string())
    }
}

/// Retriever returning a fixed document list
#[derive(Default)]
pub struct StaticRetriever {
    documents: Vec<Document>,
    calls: AtomicUsize,
    fail: bool,
}

impl StaticRetriever {
    pub fn new(contents: &[&str]) -> Self {
        Self {
            documents: contents
                .iter()
                .enumerate()
                .map(|(i, c)| Document::new(*c).with_metadata("source", format!("doc{}.md", i)))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<Document>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("vector store offline");
        }
        Ok(self.documents.clone())
    }
}

/// Web search returning "web result N" for the N-th call
#[derive(Default)]
pub struct CountingSearch {
    calls: AtomicUsize,
    fail: bool,
}

impl CountingSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearch for CountingSearch {
    async fn search(&self, _query: &str) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            anyhow::bail!("search rate limited");
        }
        Ok(format!("web result {}", n))
    }
}

/// Keyword-count embedder over a tiny fixed vocabulary
pub struct KeywordEmbedder;

pub const VOCABULARY: [&str; 4] = ["vacation", "expense", "laptop", "security"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model(&self) -> &str {
        "keyword-test"
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let words: Vec<&str> = lower
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                    .collect();
                VOCABULARY
                    .iter()
                    .map(|term| words.iter().filter(|w| *w == term).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// Embedder whose service is always down
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model(&self) -> &str {
        "failing-test"
    }

    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding service unavailable")
    }
}

/// One-page PDF with a single line of Helvetica text
pub fn text_pdf(text: &str) -> Vec<u8> {
    use lopdf::dictionary;
    use lopdf::{Document, Object, Stream};

    let mut doc = Document::with_version("1.4");
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        },
    });
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    });
    if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
        page.set("Parent", pages_id);
    }

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

/// Handles to every port double so tests can inspect call counts
pub struct Harness {
    pub classifier: Arc<ScriptedClassifier>,
    pub generator: Arc<CountingGenerator>,
    pub retriever: Arc<StaticRetriever>,
    pub search: Arc<CountingSearch>,
}

impl Harness {
    pub fn new(classifier: ScriptedClassifier, retriever: StaticRetriever) -> Self {
        Self {
            classifier: Arc::new(classifier),
            generator: Arc::new(CountingGenerator::new()),
            retriever: Arc::new(retriever),
            search: Arc::new(CountingSearch::new()),
        }
    }

    pub fn with_generator(mut self, generator: CountingGenerator) -> Self {
        self.generator = Arc::new(generator);
        self
    }

    pub fn with_search(mut self, search: CountingSearch) -> Self {
        self.search = Arc::new(search);
        self
    }

    pub fn ports(&self) -> Ports {
        Ports {
            classifier: self.classifier.clone(),
            generator: self.generator.clone(),
            retriever: Some(self.retriever.clone()),
            web_search: self.search.clone(),
        }
    }

    pub fn workflow(&self) -> Workflow {
        Workflow::new(self.ports(), WorkflowLimits::default())
    }

    pub fn workflow_with(&self, limits: WorkflowLimits) -> Workflow {
        Workflow::new(self.ports(), limits)
    }
}

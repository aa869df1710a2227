//! Ports to external capabilities and their concrete adapters.
//!
//! The workflow only sees the traits defined here. Implementations are
//! long-lived, shared across concurrent runs behind `Arc`, and own their
//! own timeouts: a timed-out call is just a failed call.

pub mod embeddings;
pub mod llm;
pub mod search;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::Document;

pub use embeddings::EmbeddingClient;
pub use llm::ChatClient;
pub use search::DuckDuckGoSearch;

/// Turns a prompt into a small structured verdict (JSON-mode model call)
#[async_trait]
pub trait Classifier: Send + Sync {
    /// `instructions` describe the verdict schema, `prompt` carries the case
    async fn classify(&self, instructions: &str, prompt: &str) -> Result<String>;
}

/// Turns a prompt into free-form text
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Returns the top-ranked documents for a query
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>>;
}

/// Returns a text result for a query
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<String>;
}

/// Maps text to embedding vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier stored alongside vectors
    fn model(&self) -> &str;

    /// Embed a batch of passages, one vector per input, in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedding provider returned no vector for query"))
    }
}

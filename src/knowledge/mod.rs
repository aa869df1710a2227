//! Knowledge base: build, persist and query the private document collection.
//!
//! This module contains:
//! - Loader: Files and directories into raw documents
//! - Splitter: Overlapping chunks for embedding
//! - Store: SQLite vector storage with cosine search
//! - KnowledgeBase: The retriever port over a persisted collection

pub mod loader;
pub mod splitter;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::adapters::{Embedder, Retriever};
use crate::config::KnowledgeSettings;
use crate::domain::Document;

pub use loader::load_sources;
pub use splitter::{RecursiveSplitter, SplitterError};
pub use store::{ScoredChunk, StoreError, VectorStore};

/// What `KnowledgeBase::setup` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Sources were loaded, chunked, embedded and persisted
    Built { documents: usize, chunks: usize },

    /// An existing collection was opened
    Loaded { chunks: usize },

    /// Nothing to build and nothing persisted; retrieval is unavailable
    Empty,
}

/// Persisted collection plus the embedder used to query it
pub struct KnowledgeBase {
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl KnowledgeBase {
    /// Build the collection from `sources`, or open the persisted one.
    ///
    /// - sources given: load, split, embed and upsert them (swapping out
    ///   the whole collection when `force_rebuild`)
    /// - nothing loaded, or no sources: fall back to the persisted
    ///   collection if it holds any chunks
    /// - otherwise: no knowledge base
    #[instrument(skip(settings, embedder, sources), fields(collection = %settings.collection))]
    pub async fn setup(
        settings: &KnowledgeSettings,
        db_path: &Path,
        embedder: Arc<dyn Embedder>,
        sources: &[PathBuf],
        force_rebuild: bool,
    ) -> Result<(Option<Self>, BuildOutcome)> {
        if !sources.is_empty() {
            let documents = load_sources(sources, settings).await;
            let splitter = RecursiveSplitter::from_settings(settings)?;
            let chunks = splitter.split_documents(&documents);

            if !chunks.is_empty() {
                // Embed before touching the store so a failed call leaves it as it was
                let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
                let vectors = embedder
                    .embed_documents(&texts)
                    .await
                    .context("Failed to embed chunks")?;
                if vectors.len() != chunks.len() {
                    anyhow::bail!(
                        "Embedder returned {} vectors for {} chunks",
                        vectors.len(),
                        chunks.len()
                    );
                }

                let store = VectorStore::open(db_path, &settings.collection)
                    .await
                    .with_context(|| format!("Failed to open knowledge base: {}", db_path.display()))?;

                let embedded = chunks.into_iter().zip(vectors).collect();
                let stored = if force_rebuild {
                    store.replace(embedder.model(), embedded).await?
                } else {
                    store.upsert(embedder.model(), embedded).await?
                };
                info!(
                    documents = documents.len(),
                    chunks = stored,
                    force_rebuild,
                    "Built knowledge base"
                );

                let kb = Self::new(store, embedder, settings.top_k);
                return Ok((
                    Some(kb),
                    BuildOutcome::Built {
                        documents: documents.len(),
                        chunks: stored,
                    },
                ));
            }

            warn!("No documents loaded from sources, keeping existing collection");
        }

        Self::open(settings, db_path, embedder).await
    }

    /// Open the persisted collection without building.
    ///
    /// Returns `Empty` when no database file exists (none is created) or
    /// the collection holds no chunks.
    pub async fn open(
        settings: &KnowledgeSettings,
        db_path: &Path,
        embedder: Arc<dyn Embedder>,
    ) -> Result<(Option<Self>, BuildOutcome)> {
        if !db_path.exists() {
            info!("No persisted knowledge base; retrieval unavailable until built");
            return Ok((None, BuildOutcome::Empty));
        }

        let store = VectorStore::open(db_path, &settings.collection)
            .await
            .with_context(|| format!("Failed to open knowledge base: {}", db_path.display()))?;
        let chunks = store.count().await?;

        if chunks == 0 {
            info!("Persisted collection is empty; retrieval unavailable until built");
            return Ok((None, BuildOutcome::Empty));
        }

        info!(chunks, "Loaded knowledge base");
        Ok((
            Some(Self::new(store, embedder, settings.top_k)),
            BuildOutcome::Loaded { chunks },
        ))
    }

    pub fn new(store: VectorStore, embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            store,
            embedder,
            top_k,
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Top-K chunks for `text`, with their similarity scores
    pub async fn query(&self, text: &str) -> Result<Vec<ScoredChunk>> {
        let vector = self
            .embedder
            .embed_query(text)
            .await
            .context("Failed to embed query")?;

        Ok(self.store.search(vector, self.top_k).await?)
    }
}

#[async_trait]
impl Retriever for KnowledgeBase {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        let chunks = self.query(query).await?;
        Ok(chunks.into_iter().map(|c| c.document).collect())
    }
}

//! Application context built once at startup.
//!
//! Owns the configuration, the shared ports and the workflow assembled from
//! them. Command handlers receive it by reference; nothing here is global.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::adapters::{ChatClient, DuckDuckGoSearch, Embedder, EmbeddingClient, Retriever};
use crate::config::ResolvedConfig;
use crate::core::{Ports, Workflow};
use crate::knowledge::{BuildOutcome, KnowledgeBase};

pub struct AppContext {
    config: ResolvedConfig,
    workflow: Arc<Workflow>,
    knowledge: Option<Arc<KnowledgeBase>>,
    embedder: Arc<dyn Embedder>,
}

impl AppContext {
    /// Build the concrete clients from configuration and open the
    /// persisted knowledge base, if any
    pub async fn initialize(config: ResolvedConfig) -> Result<Self> {
        let chat = Arc::new(ChatClient::from_settings(&config.llm)?);
        let embedder: Arc<dyn Embedder> = Arc::new(EmbeddingClient::from_settings(&config.embeddings)?);
        let search = Arc::new(DuckDuckGoSearch::new(&config.search)?);

        info!(model = chat.model(), "Initialized model clients");

        let ports = Ports {
            classifier: chat.clone(),
            generator: chat,
            retriever: None,
            web_search: search,
        };

        Self::assemble(config, ports, embedder).await
    }

    /// Wire the given ports together with the persisted knowledge base.
    ///
    /// `ports.retriever` is replaced by the knowledge base opened from the
    /// configured home.
    pub async fn assemble(
        config: ResolvedConfig,
        ports: Ports,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let (knowledge, _) = KnowledgeBase::setup(
            &config.knowledge,
            &config.knowledge_db_path(),
            Arc::clone(&embedder),
            &[],
            false,
        )
        .await?;
        let knowledge = knowledge.map(Arc::new);

        let workflow = Workflow::new(
            Ports {
                retriever: as_retriever(&knowledge),
                ..ports
            },
            config.workflow.clone(),
        );

        Ok(Self {
            config,
            workflow: Arc::new(workflow),
            knowledge,
            embedder,
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    pub fn knowledge(&self) -> Option<&KnowledgeBase> {
        self.knowledge.as_deref()
    }

    /// Rebuild the knowledge base and point the workflow at it.
    ///
    /// With no `sources`, the configured default sources are used. Runs
    /// already in flight keep the retriever they started with.
    pub async fn rebuild_knowledge(
        &mut self,
        sources: &[PathBuf],
        force_rebuild: bool,
    ) -> Result<BuildOutcome> {
        let sources = if sources.is_empty() {
            self.config.knowledge.sources.clone()
        } else {
            sources.to_vec()
        };

        let (knowledge, outcome) = KnowledgeBase::setup(
            &self.config.knowledge,
            &self.config.knowledge_db_path(),
            Arc::clone(&self.embedder),
            &sources,
            force_rebuild,
        )
        .await?;

        self.knowledge = knowledge.map(Arc::new);
        self.workflow = Arc::new(self.workflow.with_retriever(as_retriever(&self.knowledge)));

        Ok(outcome)
    }
}

fn as_retriever(knowledge: &Option<Arc<KnowledgeBase>>) -> Option<Arc<dyn Retriever>> {
    knowledge
        .as_ref()
        .map(|kb| Arc::clone(kb) as Arc<dyn Retriever>)
}

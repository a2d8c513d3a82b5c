//! Component wiring.
//!
//! [`DocChat`] builds the session store, the capabilities, the ingestion
//! pipeline and the query engine from one [`Config`]. It is constructed
//! once at startup and passed by handle; cloning is cheap.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::answer::AnswerComposer;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::ingest::IngestionPipeline;
use crate::llm::{Generator, OllamaGenerator};
use crate::query::QueryEngine;
use crate::retrieve::Retriever;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct DocChat {
    pub config: Arc<Config>,
    pub store: Arc<SessionStore>,
    pub pipeline: Arc<IngestionPipeline>,
    pub engine: Arc<QueryEngine>,
    generator: Arc<dyn Generator>,
}

impl DocChat {
    /// Wire production backends as configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)
            .context("Failed to create embedding provider")?;
        let generator: Arc<dyn Generator> =
            Arc::new(OllamaGenerator::new(&config.llm).context("Failed to create LLM client")?);
        info!(
            embedder = embedder.model_name(),
            generator = generator.model_name(),
            strategy = ?config.chunking.strategy,
            top_k = config.retrieval.top_k,
            "components initialised"
        );
        Ok(Self::with_capabilities(config, embedder, generator))
    }

    /// Wire the given capabilities around a fresh session store.
    pub fn with_capabilities(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let store = Arc::new(SessionStore::new(config.session.unknown));
        let pipeline = Arc::new(IngestionPipeline::new(
            config,
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&generator),
        ));
        let retriever = Retriever::new(
            embedder,
            config.retrieval.top_k,
            config.embedding.retry_policy(),
        );
        let composer = AnswerComposer::new(Arc::clone(&generator), config.llm.retry_policy());
        let engine = Arc::new(QueryEngine::new(Arc::clone(&store), retriever, composer));

        Self {
            config: Arc::new(config.clone()),
            store,
            pipeline,
            engine,
            generator,
        }
    }

    /// Liveness of the language model backend.
    pub async fn llm_available(&self) -> bool {
        self.generator.is_available().await
    }
}

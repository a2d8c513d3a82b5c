//! In-process embeddings via fastembed.
//!
//! The model is downloaded on first use and kept loaded behind a mutex;
//! inference runs on the blocking pool.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::CapabilityError;

pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: Option<usize>,
    batch_size: usize,
    loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let model = config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            dims: config.dims,
            batch_size: config.batch_size,
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm" | "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported: all-minilm-l6-v2, bge-small-en-v1.5, \
             bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ),
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        let texts = texts.to_vec();
        let loaded = Arc::clone(&self.loaded);
        let model = self.model.clone();
        let batch_size = self.batch_size;

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded.lock().unwrap_or_else(|p| p.into_inner());
            if guard.is_none() {
                let embedding = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|e| {
                    CapabilityError::Rejected(format!(
                        "Failed to initialize local embedding model: {}",
                        e
                    ))
                })?;
                *guard = Some(embedding);
            }
            match guard.as_mut() {
                Some(embedding) => embedding
                    .embed(texts, Some(batch_size))
                    .map_err(|e| CapabilityError::Malformed(format!("Local embedding failed: {}", e))),
                None => Err(CapabilityError::Rejected(
                    "local embedding model not loaded".to_string(),
                )),
            }
        })
        .await
        .map_err(|e| CapabilityError::Rejected(format!("embedding task failed: {}", e)))?
    }
}

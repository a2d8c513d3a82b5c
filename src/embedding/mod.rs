//! Embedding capability and backends.
//!
//! Defines the [`Embedder`] trait the pipeline depends on, and concrete
//! implementations:
//! - **[`DisabledEmbedder`]**: rejects every call; used when embeddings are not configured.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API.
//! - **`LocalEmbedder`**: runs a sentence-transformer in-process via fastembed
//!   (feature `local-embeddings-fastembed`); no network calls after model download.
//!
//! Backends make exactly one attempt per call and classify failures into
//! [`CapabilityError`]. Timeouts and retries are the caller's business; see
//! [`embed_all`] and [`crate::retry`].
//!
//! # Error classification
//!
//! | Outcome | Error |
//! |---------|-------|
//! | HTTP 429 / 5xx | `Transient` |
//! | other HTTP 4xx | `Rejected` |
//! | network error | `Transient` |
//! | unparseable body, wrong count | `Malformed` |

#[cfg(feature = "local-embeddings-fastembed")]
mod local;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::EmbeddingConfig;
use crate::error::CapabilityError;
use crate::retry::{with_retry, RetryPolicy};

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Maps text to fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm"`).
    fn model_name(&self) -> &str;

    /// Expected vector dimensionality, if known before the first call.
    fn dims(&self) -> Option<usize>;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError>;
}

/// Embed every text in batches of `batch_size`, each batch under `policy`.
///
/// All-or-nothing: the first failing batch aborts the whole call and no
/// partial results are returned. Stops early with
/// [`CapabilityError::Rejected`] if `cancel` fires between batches.
pub async fn embed_all(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<f32>>, CapabilityError> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        if cancel.is_cancelled() {
            return Err(CapabilityError::Rejected("embedding cancelled".to_string()));
        }
        let vectors = with_retry("embed", policy, || embedder.embed(batch)).await?;
        if vectors.len() != batch.len() {
            return Err(CapabilityError::Malformed(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        out.extend(vectors);
    }

    if let Some(expected) = embedder.dims() {
        if let Some(bad) = out.iter().find(|v| v.len() != expected) {
            return Err(CapabilityError::Malformed(format!(
                "expected {}-dimensional embeddings from {}, got {}",
                expected,
                embedder.model_name(),
                bad.len()
            )));
        }
    }
    Ok(out)
}

/// Embed a single query text under `policy`.
pub async fn embed_query(
    embedder: &dyn Embedder,
    text: &str,
    policy: &RetryPolicy,
) -> Result<Vec<f32>, CapabilityError> {
    let input = [text.to_string()];
    let results = with_retry("embed", policy, || embedder.embed(&input)).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| CapabilityError::Malformed("empty embedding response".to_string()))
}

// ============ Disabled ============

/// An embedder that always fails.
///
/// Used when `embedding.provider = "disabled"`. Ingestion will end in the
/// `Error` state with a descriptive message.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> Option<usize> {
        None
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        Err(CapabilityError::Rejected(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance.
///
/// Calls `POST {url}/api/embed` with the configured model. Requires the
/// model to be pulled (e.g. `ollama pull all-minilm`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: Option<usize>,
    url: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm".to_string());
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            dims: config.dims,
            url,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                CapabilityError::Transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let json = read_json("Ollama", response).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, CapabilityError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| CapabilityError::Malformed("missing embeddings array".to_string()))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .ok_or_else(|| CapabilityError::Malformed("embedding is not an array".to_string()))
                .map(|values| to_f32_vec(values))
        })
        .collect()
}

// ============ OpenAI ============

/// Embedder using the OpenAI API.
///
/// Calls `POST https://api.openai.com/v1/embeddings` (or `embedding.url`).
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    model: String,
    dims: Option<usize>,
    url: String,
    api_key: String,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns an error if `model` is not set in config, or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model,
            dims: config.dims,
            url,
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let json = read_json("OpenAI", response).await?;
        parse_openai_response(&json)
    }
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, CapabilityError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| CapabilityError::Malformed("missing data array".to_string()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| CapabilityError::Malformed("missing embedding".to_string()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32_vec(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Shared HTTP helpers ============

/// Classify the HTTP status and decode a JSON body.
async fn read_json(
    backend: &str,
    response: reqwest::Response,
) -> Result<serde_json::Value, CapabilityError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()));
    }

    let body_text = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", backend, status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(CapabilityError::Transient(message))
    } else {
        Err(CapabilityError::Rejected(message))
    }
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires building with --features local-embeddings-fastembed"
        ),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-length vector.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Euclidean distance; `f32::INFINITY` for vectors of different lengths.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

//! TOML configuration.
//!
//! Every section is optional; a missing key falls back to the default
//! documented on its field. [`load_config`] parses and validates a file,
//! [`Config::default`] is used when no file exists.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [chunking]
//! strategy = "semantic"
//! max_chars = 1200
//!
//! [embedding]
//! provider = "ollama"
//! model = "all-minilm"
//!
//! [llm]
//! model = "deepseek-r1:1.5b"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    /// Uploads larger than this are rejected with 413.
    pub max_bytes: usize,
    /// Lower-case extensions without the dot.
    pub allowed_extensions: Vec<String>,
    /// Where uploads are persisted while processing. `None` = system temp dir.
    pub dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            allowed_extensions: vec![
                "pdf".to_string(),
                "txt".to_string(),
                "md".to_string(),
                "docx".to_string(),
            ],
            dir: None,
        }
    }
}

impl UploadConfig {
    /// Whether `filename` has one of the allowed extensions (case-insensitive).
    pub fn accepts(&self, filename: &str) -> bool {
        let ext = match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_ascii_lowercase(),
            None => return false,
        };
        self.allowed_extensions
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&ext))
    }

    /// Human-readable list for error messages, e.g. `"PDF, TXT"`.
    pub fn allowed_label(&self) -> String {
        self.allowed_extensions
            .iter()
            .map(|e| e.to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Sentence/paragraph packing up to `max_chars`.
    Structural,
    /// Structural packing plus forced breaks where adjacent sentence
    /// embeddings diverge.
    Semantic,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,
    pub max_chars: usize,
    /// Trailing context from the previous chunk prepended to the embedding
    /// input. Does not affect chunk text.
    pub overlap_chars: usize,
    /// Semantic strategy only: distances above this percentile break.
    pub breakpoint_percentile: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Structural,
            max_chars: 1200,
            overlap_chars: 0,
            breakpoint_percentile: 95.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    L2,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub metric: Metric,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            metric: Metric::Cosine,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `ollama`, `openai`, `local`, or `disabled`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub url: Option<String>,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: Some("all-minilm".to_string()),
            dims: None,
            url: None,
            batch_size: 32,
            timeout_secs: 30,
            max_retries: 1,
            backoff_ms: 500,
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub liveness_timeout_secs: u64,
    /// Refuse to ingest while the LLM is unreachable.
    pub check_before_ingest: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "deepseek-r1:1.5b".to_string(),
            url: "http://localhost:11434".to_string(),
            timeout_secs: 120,
            max_retries: 1,
            backoff_ms: 1000,
            liveness_timeout_secs: 2,
            check_before_ingest: true,
        }
    }
}

impl LlmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

/// What to do with a session id the store has never seen.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnknownSessionPolicy {
    /// Create the session on first contact.
    #[default]
    Create,
    /// Status and question calls fail with `SessionNotFound`.
    Reject,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SessionConfig {
    pub unknown: UnknownSessionPolicy,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Parse and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    let chunking = &config.chunking;
    if chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if chunking.overlap_chars >= chunking.max_chars {
        bail!("chunking.overlap_chars must be < chunking.max_chars");
    }
    if !(chunking.breakpoint_percentile > 0.0 && chunking.breakpoint_percentile <= 100.0) {
        bail!("chunking.breakpoint_percentile must be in (0, 100]");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.upload.max_bytes == 0 {
        bail!("upload.max_bytes must be > 0");
    }
    if config.upload.allowed_extensions.is_empty() {
        bail!("upload.allowed_extensions must not be empty");
    }

    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }
    if embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0 when set");
    }
    if embedding.provider == "openai" && embedding.model.is_none() {
        bail!("embedding.model must be specified when provider is 'openai'");
    }

    if config.llm.model.trim().is_empty() {
        bail!("llm.model must not be empty");
    }
    if config.llm.timeout_secs == 0 || config.llm.liveness_timeout_secs == 0 {
        bail!("llm timeouts must be > 0");
    }

    Ok(())
}

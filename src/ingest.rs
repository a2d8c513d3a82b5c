//! Ingestion pipeline orchestration.
//!
//! Turns an uploaded file into a queryable [`IndexedDocument`]:
//!
//! ```text
//! accept ─▶ persist ─▶ [LLM check] ─▶ extract ─▶ chunk ─▶ embed ─▶ index ─▶ complete
//!  Uploading   Processing                                               Processed
//! ```
//!
//! [`IngestionPipeline::accept`] validates the upload, moves the session to
//! `Uploading` and spawns the run; it never waits for processing. Any step
//! failure is recorded as the session's `Error` message. The run races its
//! ticket's cancellation token, so a superseded run stops at its next
//! suspension point, and its late writes are refused by the store anyway.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chunk::{semantic_breakpoints, ChunkSpan, Chunker};
use crate::config::{ChunkStrategy, ChunkingConfig, Config, Metric, UploadConfig};
use crate::embedding::{embed_all, Embedder};
use crate::error::{CapabilityError, RagError, Result};
use crate::extract::extract_text;
use crate::index::build_index;
use crate::llm::Generator;
use crate::models::{Chunk, DocumentStatus};
use crate::retry::RetryPolicy;
use crate::session::{digest_hex, IndexedDocument, SessionStore, UploadTicket};

pub const LLM_DOWN_MESSAGE: &str =
    "Ollama is not running. Please start Ollama before processing documents.";

/// How an ingestion run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The session is `Processed` with this many chunks.
    Completed { chunks: usize },
    /// The session is `Error` with this message.
    Failed(String),
    /// A newer upload took over; this run wrote nothing terminal.
    Superseded,
}

/// An accepted upload: the run's ticket and its background task.
pub struct Accepted {
    pub ticket: UploadTicket,
    pub task: JoinHandle<IngestOutcome>,
}

pub struct IngestionPipeline {
    store: Arc<SessionStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    upload: UploadConfig,
    chunking: ChunkingConfig,
    metric: Metric,
    batch_size: usize,
    embed_policy: RetryPolicy,
    check_llm: bool,
}

impl IngestionPipeline {
    pub fn new(
        config: &Config,
        store: Arc<SessionStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            upload: config.upload.clone(),
            chunking: config.chunking.clone(),
            metric: config.retrieval.metric,
            batch_size: config.embedding.batch_size,
            embed_policy: config.embedding.retry_policy(),
            check_llm: config.llm.check_before_ingest,
        }
    }

    /// Reject uploads that can never succeed. Session state is untouched.
    pub fn validate(&self, session_id: &str, filename: &str, size: usize) -> Result<()> {
        if session_id.trim().is_empty() {
            return Err(RagError::InvalidRequest("Session ID is required".to_string()));
        }
        if !self.upload.accepts(filename) {
            return Err(RagError::UnsupportedFileType {
                filename: filename.to_string(),
                allowed: self.upload.allowed_label(),
            });
        }
        if size > self.upload.max_bytes {
            return Err(RagError::PayloadTooLarge {
                size,
                limit: self.upload.max_bytes,
            });
        }
        Ok(())
    }

    /// Validate, move the session to `Uploading`, and start processing in
    /// the background.
    pub fn accept(self: &Arc<Self>, session_id: &str, filename: &str, bytes: Vec<u8>) -> Result<Accepted> {
        let filename = base_name(filename);
        self.validate(session_id, &filename, bytes.len())?;

        let ticket = self.store.begin_upload(session_id, &filename);
        info!(
            session_id = %ticket.session_id,
            generation = ticket.generation,
            filename = %filename,
            bytes = bytes.len(),
            "upload accepted"
        );

        let pipeline = Arc::clone(self);
        let run_ticket = ticket.clone();
        let task = tokio::spawn(async move { pipeline.ingest(run_ticket, bytes).await });
        Ok(Accepted { ticket, task })
    }

    /// Process one upload to a terminal state, unless superseded first.
    pub async fn ingest(&self, ticket: UploadTicket, bytes: Vec<u8>) -> IngestOutcome {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ticket.cancellation().cancelled() => Err(RagError::Superseded),
            result = self.process(&ticket, bytes) => result,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(document) => {
                let chunks = document.chunks.len();
                let digest = document.digest.clone();
                if self.store.complete(&ticket, document) {
                    info!(
                        session_id = %ticket.session_id,
                        generation = ticket.generation,
                        chunks,
                        digest = %digest,
                        elapsed_ms,
                        "document processed"
                    );
                    IngestOutcome::Completed { chunks }
                } else {
                    self.superseded(&ticket)
                }
            }
            Err(RagError::Superseded) => self.superseded(&ticket),
            Err(e) => {
                let message = e.to_string();
                if self.store.fail(&ticket, &message) {
                    warn!(
                        session_id = %ticket.session_id,
                        generation = ticket.generation,
                        elapsed_ms,
                        error = %message,
                        "document processing failed"
                    );
                    IngestOutcome::Failed(message)
                } else {
                    self.superseded(&ticket)
                }
            }
        }
    }

    fn superseded(&self, ticket: &UploadTicket) -> IngestOutcome {
        info!(
            session_id = %ticket.session_id,
            generation = ticket.generation,
            "ingestion superseded, result discarded"
        );
        IngestOutcome::Superseded
    }

    async fn process(&self, ticket: &UploadTicket, bytes: Vec<u8>) -> Result<IndexedDocument> {
        let digest = digest_hex(&bytes);
        let persisted = persist(self.upload.dir.clone(), &ticket.filename, bytes).await?;
        if !self.store.advance(ticket, DocumentStatus::Processing) {
            return Err(RagError::Superseded);
        }
        debug!(
            session_id = %ticket.session_id,
            path = %persisted.path().display(),
            "upload persisted"
        );

        if self.check_llm && !self.generator.is_available().await {
            return Err(RagError::LlmUnavailable(LLM_DOWN_MESSAGE.to_string()));
        }

        let text = extract(persisted.path().to_path_buf(), ticket.filename.clone()).await?;
        drop(persisted);

        let spans = self.chunk(ticket, &text).await?;
        if spans.is_empty() {
            return Err(RagError::EmptyDocument);
        }
        info!(
            session_id = %ticket.session_id,
            chars = text.len(),
            chunks = spans.len(),
            "document chunked"
        );

        let inputs: Vec<String> = spans.iter().map(ChunkSpan::embedding_input).collect();
        let vectors = embed_all(
            self.embedder.as_ref(),
            &inputs,
            self.batch_size,
            &self.embed_policy,
            ticket.cancellation(),
        )
        .await
        .map_err(RagError::Embedding)?;

        let chunks: Vec<Chunk> = spans
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (span, embedding))| Chunk {
                index,
                text: span.text,
                embedding: Arc::from(embedding),
            })
            .collect();

        let index = build_index(&chunks, self.metric)
            .map_err(|e| RagError::Embedding(CapabilityError::Malformed(e.to_string())))?;
        debug!(
            session_id = %ticket.session_id,
            vectors = index.len(),
            dims = ?index.dims(),
            "index built"
        );

        Ok(IndexedDocument::new(
            ticket.filename.clone(),
            digest,
            chunks,
            index,
        ))
    }

    async fn chunk(&self, ticket: &UploadTicket, text: &str) -> Result<Vec<ChunkSpan>> {
        let chunker = Chunker::new(&self.chunking);
        match self.chunking.strategy {
            ChunkStrategy::Structural => Ok(chunker.chunk(text)),
            ChunkStrategy::Semantic => {
                let units = chunker.units(text);
                if units.len() < 3 {
                    return Ok(chunker.pack(&units, &[]));
                }
                let sentences: Vec<String> = units.iter().map(|u| u.text.clone()).collect();
                let vectors = embed_all(
                    self.embedder.as_ref(),
                    &sentences,
                    self.batch_size,
                    &self.embed_policy,
                    ticket.cancellation(),
                )
                .await
                .map_err(RagError::Embedding)?;
                let breaks = semantic_breakpoints(&vectors, self.chunking.breakpoint_percentile);
                debug!(
                    session_id = %ticket.session_id,
                    sentences = units.len(),
                    breaks = breaks.len(),
                    "semantic breakpoints computed"
                );
                Ok(chunker.pack(&units, &breaks))
            }
        }
    }
}

/// Strip any client-supplied directory components.
fn base_name(filename: &str) -> String {
    let normalized = filename.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename)
        .to_string()
}

/// Write the upload to a temp file that lives until extraction finishes.
async fn persist(
    dir: Option<PathBuf>,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<tempfile::NamedTempFile> {
    let suffix = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    tokio::task::spawn_blocking(move || -> std::io::Result<tempfile::NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("docchat-").suffix(&suffix);
        let mut file = match dir {
            Some(dir) => {
                std::fs::create_dir_all(&dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(|e| RagError::Io(std::io::Error::other(e.to_string())))?
    .map_err(RagError::Io)
}

/// Read the persisted upload and extract its text off the async runtime.
async fn extract(path: PathBuf, filename: String) -> Result<String> {
    tokio::task::spawn_blocking(move || -> Result<String> {
        let bytes = std::fs::read(&path)?;
        extract_text(&bytes, &filename).map_err(|e| RagError::Extraction(e.to_string()))
    })
    .await
    .map_err(|e| RagError::Extraction(format!("extraction task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_drops_directories() {
        assert_eq!(base_name("report.pdf"), "report.pdf");
        assert_eq!(base_name("../../etc/passwd.txt"), "passwd.txt");
        assert_eq!(base_name("C:\\Users\\me\\notes.md"), "notes.md");
    }

    #[tokio::test]
    async fn persist_writes_bytes_with_extension() {
        let dir = tempfile::tempdir().unwrap();
        let file = persist(Some(dir.path().join("uploads")), "a.txt", b"hello".to_vec())
            .await
            .unwrap();
        assert!(file.path().to_string_lossy().ends_with(".txt"));
        assert_eq!(std::fs::read(file.path()).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn extract_reports_unreadable_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        let err = extract(path, "broken.pdf".to_string()).await.unwrap_err();
        assert!(matches!(err, RagError::Extraction(_)));
    }
}

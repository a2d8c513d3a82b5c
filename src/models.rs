//! Core data models shared by the pipeline, the store, and the HTTP layer.
//!
//! These types represent the chunks, statuses, and answers that flow
//! through ingestion and question answering.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Processing status of a session's document.
///
/// Serialized with the variant name (`"NotUploaded"`, `"Processed"`, ...),
/// which is also what the status endpoint returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DocumentStatus {
    NotUploaded,
    Uploading,
    Processing,
    Processed,
    Error,
}

impl DocumentStatus {
    /// Whether a pipeline write may move a session from `self` to `next`.
    ///
    /// Accepting a new upload (any state → `Uploading`) is not a pipeline
    /// write and is handled by the store directly.
    pub fn can_advance_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Uploading, Processing)
                | (Processing, Processed)
                | (Uploading, Error)
                | (Processing, Error)
        )
    }

    /// `Processed` and `Error` stay put until the next upload.
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Processed | DocumentStatus::Error)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentStatus::NotUploaded => "NotUploaded",
            DocumentStatus::Uploading => "Uploading",
            DocumentStatus::Processing => "Processing",
            DocumentStatus::Processed => "Processed",
            DocumentStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

/// An embedded chunk of the session's document.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Dense, zero-based position in the document. Breaks retrieval ties.
    pub index: usize,
    pub text: String,
    /// Shared with the vector index; never mutated after ingestion.
    pub embedding: Arc<[f32]>,
}

/// Point-in-time view of a session, as returned by the status endpoint and
/// pushed on the session's event channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub session_id: String,
    pub status: DocumentStatus,
    pub filename: Option<String>,
    pub error: Option<String>,
    /// Number of indexed chunks once `Processed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    /// SHA-256 of the processed upload, hex-encoded, once `Processed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A chunk selected for a question, with its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub index: usize,
    pub score: f32,
    #[serde(skip)]
    pub text: String,
}

/// Outcome of a single question.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub question: String,
    /// Retrieved chunks in ranked order.
    pub sources: Vec<RetrievedChunk>,
    /// Unmodified model output.
    pub raw: String,
    pub answer: String,
    pub thinking: String,
}

impl QueryResult {
    /// Chunk indices in ranked order.
    pub fn chunk_indices(&self) -> Vec<usize> {
        self.sources.iter().map(|s| s.index).collect()
    }
}

//! Error types for the document pipeline and query path.
//!
//! Two layers:
//!
//! - [`CapabilityError`]: failures of the external embedding / generation
//!   backends. Carries just enough classification for the retry wrapper in
//!   [`crate::retry`] to decide whether another attempt is worthwhile.
//! - [`RagError`]: the domain taxonomy surfaced to callers. Ingestion
//!   errors are recorded into session state as their `Display` text;
//!   query-time errors are returned to the caller and mapped to HTTP
//!   responses by [`crate::server`].

use std::time::Duration;

use thiserror::Error;

use crate::models::DocumentStatus;

/// Result alias for operations that fail with a [`RagError`].
pub type Result<T> = std::result::Result<T, RagError>;

/// Failure of an external capability call (embedder or LLM).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CapabilityError {
    /// Network error, rate limit, or 5xx. Worth retrying.
    #[error("{0}")]
    Transient(String),
    /// The backend refused the request (4xx, disabled provider, bad config).
    #[error("{0}")]
    Rejected(String),
    /// The backend answered but the payload was unusable.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The call did not finish within the caller's budget.
    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
}

impl CapabilityError {
    /// Whether a retry may succeed where this attempt failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, CapabilityError::Transient(_) | CapabilityError::Timeout(_))
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not expose the configured budget; the retry layer
            // reports its own timeout with the real duration.
            CapabilityError::Transient(format!("request timed out: {}", e))
        } else if e.is_decode() {
            CapabilityError::Malformed(e.to_string())
        } else {
            CapabilityError::Transient(e.to_string())
        }
    }
}

/// Domain errors for ingestion and question answering.
#[derive(Debug, Error)]
pub enum RagError {
    /// The uploaded bytes could not be turned into text.
    #[error("could not extract text from document: {0}")]
    Extraction(String),

    /// Extraction succeeded but produced nothing to index.
    #[error("document contains no extractable text")]
    EmptyDocument,

    /// The embedding backend failed after retry.
    #[error("embedding failed: {0}")]
    Embedding(CapabilityError),

    /// The LLM failed after retry.
    #[error("generation failed: {0}")]
    Generation(CapabilityError),

    /// The LLM backend is not reachable at all.
    #[error("{0}")]
    LlmUnavailable(String),

    /// A question arrived before the session's document reached `Processed`.
    #[error("{}", not_ready_message(.status, .error))]
    DocumentNotReady {
        status: DocumentStatus,
        error: Option<String>,
    },

    /// The session id has never been seen and the store rejects unknown ids.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The upload's file type is not accepted.
    #[error("Only {allowed} files are supported")]
    UnsupportedFileType { filename: String, allowed: String },

    /// The upload exceeds `upload.max_bytes`.
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Malformed request (missing session id, empty question, ...).
    #[error("{0}")]
    InvalidRequest(String),

    /// Local I/O while persisting the upload.
    #[error("could not store upload: {0}")]
    Io(#[from] std::io::Error),

    /// A newer upload replaced the run that produced this error. Never
    /// written into session state.
    #[error("ingestion superseded by a newer upload")]
    Superseded,
}

impl RagError {
    /// True when the underlying capability call ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RagError::Embedding(CapabilityError::Timeout(_))
                | RagError::Generation(CapabilityError::Timeout(_))
        )
    }
}

fn not_ready_message(status: &DocumentStatus, error: &Option<String>) -> String {
    match (status, error) {
        (DocumentStatus::Error, Some(e)) => format!("Error processing document: {}", e),
        (DocumentStatus::Error, None) => "Error processing document".to_string(),
        (DocumentStatus::NotUploaded, _) => {
            "No document has been processed for this session".to_string()
        }
        _ => "Document processing not completed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_message_reflects_status() {
        let err = RagError::DocumentNotReady {
            status: DocumentStatus::Processing,
            error: None,
        };
        assert_eq!(err.to_string(), "Document processing not completed");

        let err = RagError::DocumentNotReady {
            status: DocumentStatus::Error,
            error: Some("bad pdf".to_string()),
        };
        assert_eq!(err.to_string(), "Error processing document: bad pdf");

        let err = RagError::DocumentNotReady {
            status: DocumentStatus::NotUploaded,
            error: None,
        };
        assert!(err.to_string().contains("No document"));
    }

    #[test]
    fn transient_classification() {
        assert!(CapabilityError::Transient("503".into()).is_transient());
        assert!(CapabilityError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!CapabilityError::Rejected("400".into()).is_transient());
        assert!(!CapabilityError::Malformed("no data".into()).is_transient());
    }

    #[test]
    fn timeout_detection() {
        let err = RagError::Generation(CapabilityError::Timeout(Duration::from_secs(60)));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out after 60s"));
        assert!(!RagError::EmptyDocument.is_timeout());
    }
}

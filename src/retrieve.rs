//! Query-time retrieval over a processed document.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::{embed_query, Embedder};
use crate::error::{CapabilityError, RagError, Result};
use crate::models::RetrievedChunk;
use crate::retry::RetryPolicy;
use crate::session::IndexedDocument;

/// Embeds a question and returns the document's top-K chunks.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    policy: RetryPolicy,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, top_k: usize, policy: RetryPolicy) -> Self {
        Self {
            embedder,
            top_k: top_k.max(1),
            policy,
        }
    }

    /// Ranked chunks for `question`; `min(top_k, len)` of them.
    pub async fn retrieve(
        &self,
        document: &IndexedDocument,
        question: &str,
    ) -> Result<Vec<RetrievedChunk>> {
        if document.index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = embed_query(self.embedder.as_ref(), question, &self.policy)
            .await
            .map_err(RagError::Embedding)?;
        self.query(document, &vector)
    }

    /// Rank chunks against an already-embedded question.
    pub fn query(&self, document: &IndexedDocument, vector: &[f32]) -> Result<Vec<RetrievedChunk>> {
        let k = self.top_k.min(document.index.len());
        let hits = document
            .index
            .query(vector, k)
            .map_err(|e| RagError::Embedding(CapabilityError::Malformed(e.to_string())))?;

        let retrieved: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter_map(|hit| {
                document.chunk(hit.index).map(|chunk| RetrievedChunk {
                    index: hit.index,
                    score: hit.score,
                    text: chunk.text.clone(),
                })
            })
            .collect();
        debug!(
            filename = %document.filename,
            k,
            retrieved = retrieved.len(),
            "retrieval complete"
        );
        Ok(retrieved)
    }
}

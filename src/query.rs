//! Question answering façade: session lookup → retrieval → composition.

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::answer::AnswerComposer;
use crate::error::{RagError, Result};
use crate::models::QueryResult;
use crate::retrieve::Retriever;
use crate::session::SessionStore;

pub struct QueryEngine {
    store: Arc<SessionStore>,
    retriever: Retriever,
    composer: AnswerComposer,
}

impl QueryEngine {
    pub fn new(store: Arc<SessionStore>, retriever: Retriever, composer: AnswerComposer) -> Self {
        Self {
            store,
            retriever,
            composer,
        }
    }

    /// Answer `question` from the session's processed document.
    ///
    /// Fails with `DocumentNotReady` unless the session is `Processed`.
    /// Never changes session state.
    pub async fn ask(
        &self,
        session_id: &str,
        question: &str,
        include_reasoning: bool,
    ) -> Result<QueryResult> {
        if session_id.trim().is_empty() {
            return Err(RagError::InvalidRequest("Session ID is required".to_string()));
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest("Question is required".to_string()));
        }

        let started = Instant::now();
        // Holding the Arc keeps this document alive even if a re-upload
        // replaces it mid-question.
        let document = self.store.ready_document(session_id)?;
        let sources = self.retriever.retrieve(&document, question).await?;
        let composed = self
            .composer
            .compose(question, &document.filename, &sources, include_reasoning)
            .await?;

        info!(
            session_id = %session_id,
            sources = sources.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "question answered"
        );
        Ok(QueryResult {
            question: question.to_string(),
            sources,
            raw: composed.raw,
            answer: composed.answer,
            thinking: composed.thinking,
        })
    }
}

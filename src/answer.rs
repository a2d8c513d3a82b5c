//! Grounded prompt assembly and answer/reasoning separation.
//!
//! [`build_prompt`] renders the retrieved chunks into a fixed instruction
//! template that tells the model to answer only from the given context.
//! [`split_reasoning`] separates the model's output into a user-facing
//! answer and a reasoning trace.
//!
//! The split is a best-effort heuristic, not a semantic parse. In order:
//!
//! 1. A `<think>…</think>` block (reasoning models) is the thinking; the
//!    text after it is the answer. With nothing after the block the answer
//!    is [`NO_FINAL_ANSWER`].
//! 2. A line starting with `Final Answer:` begins the answer; everything
//!    before it is thinking.
//! 3. With several paragraphs, the last paragraph is the answer and the
//!    others are thinking.
//! 4. A single paragraph is all answer.

use std::sync::Arc;

use tracing::debug;

use crate::error::{RagError, Result};
use crate::llm::Generator;
use crate::models::RetrievedChunk;
use crate::retry::{with_retry, RetryPolicy};

const INSTRUCTIONS: &str = "\
1. Use the following pieces of context to answer the question at the end.
2. If you don't know the answer, just say that \"I don't know\" but don't make up an answer on your own.
3. Keep the answer clear and concise.";

/// Answer reported when the model closes its reasoning without answering.
pub const NO_FINAL_ANSWER: &str = "The model produced reasoning but no final answer.";

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Render the grounded prompt. Chunks appear in ranked order.
pub fn build_prompt(question: &str, source: &str, chunks: &[RetrievedChunk]) -> String {
    let context = chunks
        .iter()
        .map(|c| format!("Content: {}\nSource: {}", c.text, source))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{}\nContext: {}\nQuestion: {}\nHelpful Answer:",
        INSTRUCTIONS, context, question
    )
}

/// Split raw model output into `(answer, thinking)`.
pub fn split_reasoning(raw: &str) -> (String, String) {
    let text = raw.replace("\r\n", "\n");
    if let Some((thinking, answer)) = split_think_block(&text) {
        return (answer, thinking);
    }
    split_paragraphs(text.trim())
}

/// Output with any `<think>` block removed, for callers that skip reasoning.
pub fn strip_reasoning(raw: &str) -> String {
    let text = raw.replace("\r\n", "\n");
    match split_think_block(&text) {
        Some((_, answer)) => answer,
        None => text.trim().to_string(),
    }
}

/// `(thinking, answer)` when the output has a closing `</think>`. An opening
/// tag is optional; some models omit it.
fn split_think_block(text: &str) -> Option<(String, String)> {
    let close = text.find(THINK_CLOSE)?;
    let (before, after) = (&text[..close], &text[close + THINK_CLOSE.len()..]);
    let thinking = match before.find(THINK_OPEN) {
        Some(open) => &before[open + THINK_OPEN.len()..],
        None => before,
    };
    let answer = match after.trim() {
        "" => NO_FINAL_ANSWER,
        answer => answer,
    };
    Some((thinking.trim().to_string(), answer.to_string()))
}

fn split_paragraphs(text: &str) -> (String, String) {
    if let Some(pos) = final_answer_offset(text) {
        let thinking = text[..pos].trim().to_string();
        let answer = text[pos..].trim().to_string();
        return (answer, thinking);
    }

    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    match paragraphs.split_last() {
        Some((last, rest)) if !rest.is_empty() => (last.to_string(), rest.join("\n\n")),
        _ => (text.to_string(), String::new()),
    }
}

/// Byte offset of the first line that opens with a "Final Answer:" label,
/// allowing markdown emphasis or heading marks around it.
fn final_answer_offset(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let label = line.trim_start_matches(|c: char| c.is_whitespace() || c == '#' || c == '*');
        if label.len() >= 12 && label.is_char_boundary(12) && label[..12].eq_ignore_ascii_case("final answer") {
            let tail = label[12..].trim_start_matches('*');
            if tail.starts_with(':') {
                return Some(offset);
            }
        }
        offset += line.len();
    }
    None
}

/// Generated answer with its reasoning separated out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composed {
    pub raw: String,
    pub answer: String,
    pub thinking: String,
}

/// Prompts the LLM with retrieved context and splits its reply.
pub struct AnswerComposer {
    generator: Arc<dyn Generator>,
    policy: RetryPolicy,
}

impl AnswerComposer {
    pub fn new(generator: Arc<dyn Generator>, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    pub async fn compose(
        &self,
        question: &str,
        source: &str,
        chunks: &[RetrievedChunk],
        include_reasoning: bool,
    ) -> Result<Composed> {
        let prompt = build_prompt(question, source, chunks);
        let generator = self.generator.as_ref();
        let raw = with_retry("generate", &self.policy, || generator.generate(&prompt))
            .await
            .map_err(RagError::Generation)?;
        debug!(
            model = generator.model_name(),
            prompt_chars = prompt.len(),
            output_chars = raw.len(),
            "answer generated"
        );

        let (answer, thinking) = if include_reasoning {
            split_reasoning(&raw)
        } else {
            (strip_reasoning(&raw), String::new())
        };
        Ok(Composed {
            raw,
            answer,
            thinking,
        })
    }
}

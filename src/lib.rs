//! # DocChat
//!
//! Session-scoped retrieval-augmented question answering over one uploaded
//! document at a time.
//!
//! A client uploads a document for a session; it is extracted, chunked
//! along sentence and paragraph boundaries, embedded, and indexed in
//! memory. Questions against that session retrieve the closest chunks and
//! ask a language model to answer only from them, separating the model's
//! reasoning from its final answer.
//!
//! ## Architecture
//!
//! ```text
//!  upload ─▶ ┌──────────────────┐     ┌──────────────┐
//!            │ IngestionPipeline│────▶│ SessionStore │◀── status / SSE
//!            │ extract·chunk·   │     │ state machine│
//!            │ embed·index      │     │ + FlatIndex  │
//!            └──────────────────┘     └──────┬───────┘
//!                                            │ Arc<IndexedDocument>
//!  question ─▶ ┌─────────────┐   ┌───────────▼┐   ┌───────────────┐
//!              │ QueryEngine │──▶│ Retriever  │──▶│ AnswerComposer│──▶ answer + thinking
//!              └─────────────┘   └────────────┘   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Domain and capability errors |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction (PDF, DOCX, plain text) |
//! | [`chunk`] | Sentence/paragraph chunking, structural and semantic |
//! | [`embedding`] | Embedding capability and backends |
//! | [`llm`] | Generation capability and Ollama backend |
//! | [`retry`] | Timeout and retry for capability calls |
//! | [`index`] | Vector index trait and brute-force implementation |
//! | [`session`] | Session store and status state machine |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Top-K retrieval |
//! | [`answer`] | Grounded prompt and reasoning split |
//! | [`query`] | Question answering façade |
//! | [`service`] | Component wiring |
//! | [`server`] | HTTP API |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod query;
pub mod retrieve;
pub mod retry;
pub mod server;
pub mod service;
pub mod session;

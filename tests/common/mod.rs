//! Deterministic capabilities and helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use docchat::config::Config;
use docchat::embedding::Embedder;
use docchat::error::CapabilityError;
use docchat::llm::Generator;
use docchat::models::{DocumentStatus, StatusSnapshot};
use docchat::service::DocChat;

pub const DIMS: usize = 256;

/// Bag-of-words embedder: each lower-cased word is hashed into one of
/// [`DIMS`] buckets. Similar wording gives similar vectors.
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    transient_failures: AtomicUsize,
    permanent_failure: bool,
    gate: Option<(String, watch::Receiver<bool>)>,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            permanent_failure: false,
            gate: None,
        }
    }

    /// Fail the first `n` calls with a transient error.
    pub fn flaky(n: usize) -> Self {
        let embedder = Self::new();
        embedder.transient_failures.store(n, Ordering::SeqCst);
        embedder
    }

    /// Reject every call.
    pub fn broken() -> Self {
        Self {
            permanent_failure: true,
            ..Self::new()
        }
    }

    /// Block any batch containing `marker` until the returned gate opens.
    pub fn gated(marker: &str) -> (Self, Gate) {
        let (tx, rx) = watch::channel(false);
        let embedder = Self {
            gate: Some((marker.to_string(), rx)),
            ..Self::new()
        };
        (embedder, Gate(tx))
    }
}

pub struct Gate(watch::Sender<bool>);

impl Gate {
    pub fn open(&self) {
        let _ = self.0.send(true);
    }
}

pub fn embed_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let word = word.to_lowercase();
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for b in word.bytes() {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        v[(hash % DIMS as u64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bow"
    }

    fn dims(&self) -> Option<usize> {
        Some(DIMS)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.permanent_failure {
            return Err(CapabilityError::Rejected("model not found".into()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CapabilityError::Transient("503 service unavailable".into()));
        }
        if let Some((marker, gate)) = &self.gate {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                let mut gate = gate.clone();
                let _ = gate.wait_for(|open| *open).await;
            }
        }
        Ok(texts.iter().map(|t| embed_words(t)).collect())
    }
}

/// Generator returning a fixed reply and recording every prompt.
pub struct ScriptedGenerator {
    reply: String,
    available: bool,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            available: true,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn offline() -> Self {
        Self {
            available: false,
            ..Self::replying("")
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        if !self.available {
            return Err(CapabilityError::Transient("connection refused".into()));
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }

    async fn is_available(&self) -> bool {
        self.available
    }
}

/// Small chunks so each test paragraph becomes its own chunk; fast retries.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.chunking.max_chars = 120;
    config.embedding.backoff_ms = 1;
    config.embedding.timeout_secs = 5;
    config.llm.backoff_ms = 1;
    config.llm.timeout_secs = 5;
    config
}

pub fn app_with(
    config: &Config,
    embedder: Arc<HashEmbedder>,
    generator: Arc<ScriptedGenerator>,
) -> DocChat {
    DocChat::with_capabilities(config, embedder, generator)
}

pub const THREE_PARAGRAPHS: &str = "\
Rust is a systems programming language focused on safety. It was first released in 2015.

The island of Zanzibar has a capital called Stone Town. Stone Town is famous for spice markets.

Photosynthesis converts sunlight into chemical energy. Plants store that energy as sugar.";

/// Poll until the session reaches `status` or five seconds pass.
pub async fn wait_for_status(app: &DocChat, session_id: &str, status: DocumentStatus) -> StatusSnapshot {
    for _ in 0..500 {
        let snapshot = app.store.snapshot(session_id).unwrap();
        if snapshot.status == status {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "session {} never reached {:?}; last state {:?}",
        session_id,
        status,
        app.store.snapshot(session_id).unwrap()
    );
}

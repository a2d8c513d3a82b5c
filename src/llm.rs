//! Text generation capability.
//!
//! [`Generator`] is the seam between the query path and the language
//! model. [`OllamaGenerator`] is the production backend: one non-streaming
//! `POST /api/generate` per call, plus a cheap `GET /api/tags` liveness
//! probe used before ingestion.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::CapabilityError;

/// Produces a completion for a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// One attempt; timeouts and retries are applied by the caller.
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError>;

    /// Whether the backend is reachable right now.
    async fn is_available(&self) -> bool;
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    liveness_timeout: Duration,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            model: config.model.clone(),
            url: config.url.trim_end_matches('/').to_string(),
            liveness_timeout: Duration::from_secs(config.liveness_timeout_secs),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("Ollama API error {}: {}", status, text);
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                CapabilityError::Transient(message)
            } else {
                CapabilityError::Rejected(message)
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()))?;
        debug!(model = %self.model, chars = parsed.response.len(), "generation complete");
        Ok(parsed.response)
    }

    async fn is_available(&self) -> bool {
        let probe = self
            .client
            .get(format!("{}/api/tags", self.url))
            .timeout(self.liveness_timeout)
            .send()
            .await;
        match probe {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(url = %self.url, error = %e, "LLM liveness probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_response_reads_response_field() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"model":"m","response":"hello","done":true}"#).unwrap();
        assert_eq!(parsed.response, "hello");
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        let config = LlmConfig {
            url: "http://127.0.0.1:9/".to_string(),
            liveness_timeout_secs: 1,
            ..LlmConfig::default()
        };
        let generator = OllamaGenerator::new(&config).unwrap();
        assert_eq!(generator.model_name(), "deepseek-r1:1.5b");
        assert!(!generator.is_available().await);
    }
}

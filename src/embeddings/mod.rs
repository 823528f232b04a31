// src/embeddings/mod.rs
// HTTP client for the embedding service: `POST /api/embeddings` to embed
// text, `GET /api/tags` for a liveness probe.

use crate::config::EmbeddingConfig;
use crate::error::{HiveError, Result};
use crate::utils::truncate_at_boundary;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const MAX_TEXT_CHARS: usize = 8192 * 4;
const MAX_BATCH_SIZE: usize = 64;
const RETRY_ATTEMPTS: usize = 1;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

pub struct EmbeddingClient {
    host: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            http_client,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a single piece of text. Truncates overly long input rather than
    /// erroring, matching the degrade-gracefully posture of the rest of the
    /// embedding pipeline.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = if text.len() > MAX_TEXT_CHARS {
            debug!("truncating text from {} to {} chars before embedding", text.len(), MAX_TEXT_CHARS);
            truncate_at_boundary(text, MAX_TEXT_CHARS)
        } else {
            text
        };

        let url = format!("{}/api/embeddings", self.host);
        let body = EmbeddingRequest { model: &self.model, prompt: text };

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(1000)).await;
            }
            match self.http_client.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    let parsed: EmbeddingResponse = response
                        .json()
                        .await
                        .map_err(|e| HiveError::Embedder(format!("invalid embedding response: {e}")))?;
                    return Ok(parsed.embedding);
                }
                Ok(response) => {
                    let status = response.status();
                    let body_text = response.text().await.unwrap_or_default();
                    last_error = Some(HiveError::Embedder(format!("embedding request failed ({status}): {body_text}")));
                }
                Err(e) => {
                    last_error = Some(HiveError::Embedder(format!("embedding request error: {e}")));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| HiveError::Embedder("embedding request failed".into())))
    }

    /// Embed a batch of texts, one request per text (the service has no
    /// native batch endpoint), up to `MAX_BATCH_SIZE` concurrently bounded by
    /// the caller's semaphore.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH_SIZE) {
            for text in chunk {
                results.push(self.embed(text).await?);
            }
        }
        Ok(results)
    }

    /// Liveness probe used by the session-indexer embedding pipeline before
    /// it starts degrading to null embeddings.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.host);
        matches!(self.http_client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            host: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 1024,
            timeout: Duration::from_secs(5),
            concurrency: 5,
        }
    }

    #[test]
    fn dimensions_match_config() {
        let client = EmbeddingClient::new(&test_config());
        assert_eq!(client.dimensions(), 1024);
    }

    #[test]
    fn host_trailing_slash_is_stripped() {
        let mut cfg = test_config();
        cfg.host = "http://localhost:11434/".to_string();
        let client = EmbeddingClient::new(&cfg);
        assert_eq!(client.host, "http://localhost:11434");
    }
}

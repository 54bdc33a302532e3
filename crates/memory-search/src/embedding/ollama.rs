//! Ollama `/api/embed` client.
//!
//! Retry strategy:
//! - connection refused, HTTP 404 (model not pulled) → unavailable, no retry
//! - HTTP 429, 5xx and timeouts → retry with backoff of 1s, 2s, 4s ... capped at 32s
//! - other HTTP 4xx, malformed responses → failed batch, no retry

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use memory_search_core::embedding::EmbeddingBackend;
use memory_search_core::{Error, Result};

use super::check_vectors;
use crate::config::EmbeddingConfig;

pub struct OllamaBackend {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: config.url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let endpoint = format!("{}/api/embed", self.url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying ollama embed");
                tokio::time::sleep(delay).await;
            }

            let response = match self.client.post(&endpoint).json(&body).send().await {
                Ok(response) => response,
                Err(e) if e.is_connect() => {
                    return Err(Error::EmbeddingBackendUnavailable(format!(
                        "cannot reach Ollama at {} (is it running?): {}",
                        self.url, e
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::Embedding(format!("ollama request failed: {}", e)));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let json: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| Error::Embedding(format!("invalid Ollama response: {}", e)))?;
                let vectors = parse_response(&json)?;
                return check_vectors(vectors, texts.len(), self.dims);
            }

            let body_text = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(Error::EmbeddingBackendUnavailable(format!(
                    "Ollama model '{}' not found: {}",
                    self.model, body_text
                )));
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_err = Some(Error::Embedding(format!(
                    "Ollama API error {}: {}",
                    status, body_text
                )));
                continue;
            }
            return Err(Error::Embedding(format!(
                "Ollama API error {}: {}",
                status, body_text
            )));
        }

        Err(last_err
            .unwrap_or_else(|| Error::Embedding("Ollama embedding failed after retries".into())))
    }
}

fn parse_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::Embedding("invalid Ollama response: missing embeddings".into()))?;

    embeddings
        .iter()
        .map(|embedding| {
            let values = embedding.as_array().ok_or_else(|| {
                Error::Embedding("invalid Ollama response: embedding is not an array".into())
            })?;
            values
                .iter()
                .map(|v| {
                    v.as_f64().map(|f| f as f32).ok_or_else(|| {
                        Error::Embedding("invalid Ollama response: non-numeric value".into())
                    })
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let json = serde_json::json!({ "embeddings": [[0.5, -1.0], [0.0, 2.0]] });
        let vectors = parse_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![0.5, -1.0], vec![0.0, 2.0]]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let missing = serde_json::json!({ "data": [] });
        assert!(matches!(parse_response(&missing), Err(Error::Embedding(_))));

        let bad_value = serde_json::json!({ "embeddings": [[0.5, "x"]] });
        assert!(matches!(parse_response(&bad_value), Err(Error::Embedding(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            // Nothing listens on port 1.
            url: "http://127.0.0.1:1/".into(),
            max_retries: 0,
            timeout_secs: 5,
            ..EmbeddingConfig::default()
        };
        let backend = OllamaBackend::new(&config).unwrap();
        assert_eq!(backend.url, "http://127.0.0.1:1");

        let err = backend.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(err.is_backend_unavailable(), "got {:?}", err);
    }
}

//! Concrete embedding backends.
//!
//! [`create_backend`] turns the `[embedding]` config section into an
//! optional [`EmbeddingBackend`]:
//!
//! | `provider` | Backend |
//! |------------|---------|
//! | `"disabled"` | none; searches run keyword-only and report degradation |
//! | `"local"` | [`LocalBackend`] (fastembed, feature `local-embeddings-fastembed`) |
//! | `"ollama"` | [`OllamaBackend`] |
//! | `"hash"` | [`HashEmbedder`] from the core crate |
//!
//! When the binary is built without local embeddings, `"local"` yields a
//! backend that always reports itself unavailable, so the engine degrades
//! instead of refusing to open.

#[cfg(feature = "local-embeddings-fastembed")]
mod local;
mod ollama;

use async_trait::async_trait;
use std::sync::Arc;

use memory_search_core::embedding::{EmbeddingBackend, HashEmbedder};
use memory_search_core::{Error, Result};

use crate::config::EmbeddingConfig;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalBackend;
pub use ollama::OllamaBackend;

pub fn create_backend(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingBackend>>> {
    let backend: Arc<dyn EmbeddingBackend> = match config.provider.as_str() {
        "disabled" => return Ok(None),
        "hash" => Arc::new(HashEmbedder::new(config.dims)),
        "ollama" => Arc::new(OllamaBackend::new(config)?),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Arc::new(LocalBackend::new(config)?),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Arc::new(UnavailableBackend {
            model: config.model.clone(),
            dims: config.dims,
            reason: "local embeddings require --features local-embeddings-fastembed".to_string(),
        }),
        other => {
            return Err(Error::Config(format!(
                "unknown embedding provider: {}",
                other
            )))
        }
    };
    Ok(Some(backend))
}

/// A configured backend that can never serve.
pub struct UnavailableBackend {
    model: String,
    dims: usize,
    reason: String,
}

impl UnavailableBackend {
    pub fn new(model: impl Into<String>, dims: usize, reason: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            dims,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for UnavailableBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::EmbeddingBackendUnavailable(self.reason.clone()))
    }
}

/// Reject responses whose shape does not match the request.
pub(crate) fn check_vectors(
    vectors: Vec<Vec<f32>>,
    expected_count: usize,
    dims: usize,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected_count {
        return Err(Error::Embedding(format!(
            "expected {} vectors, got {}",
            expected_count,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(Error::Embedding(format!(
            "expected {} dimensions, got {}",
            dims,
            bad.len()
        )));
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            dims: 16,
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_disabled_has_no_backend() {
        assert!(create_backend(&config("disabled")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hash_backend() {
        let backend = create_backend(&config("hash")).unwrap().unwrap();
        assert_eq!(backend.model_name(), "hash-16");
        assert_eq!(backend.dims(), 16);
        let vectors = backend.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), 16);
    }

    #[test]
    fn test_unknown_provider() {
        assert!(matches!(
            create_backend(&config("openai")),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let backend = UnavailableBackend::new("m", 4, "not built");
        let err = backend.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.is_backend_unavailable());
    }

    #[test]
    fn test_check_vectors() {
        assert!(check_vectors(vec![vec![0.0; 3]], 1, 3).is_ok());
        assert!(matches!(
            check_vectors(vec![vec![0.0; 3]], 2, 3),
            Err(Error::Embedding(_))
        ));
        assert!(matches!(
            check_vectors(vec![vec![0.0; 2]], 1, 3),
            Err(Error::Embedding(_))
        ));
    }
}

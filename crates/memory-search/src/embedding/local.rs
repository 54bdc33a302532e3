//! Local inference through fastembed.
//!
//! The model is loaded on first use and kept for the life of the backend.
//! A failed load is cached too: every later call reports the backend as
//! unavailable without retrying the download.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::info;

use memory_search_core::embedding::EmbeddingBackend;
use memory_search_core::{Error, Result};

use super::check_vectors;
use crate::config::EmbeddingConfig;

type SharedModel = Arc<Mutex<fastembed::TextEmbedding>>;

pub struct LocalBackend {
    model_name: String,
    model: fastembed::EmbeddingModel,
    query_prefix: &'static str,
    passage_prefix: &'static str,
    dims: usize,
    batch_size: usize,
    loaded: OnceCell<std::result::Result<SharedModel, String>>,
}

impl LocalBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (query_prefix, passage_prefix) = prompt_prefixes(&config.model);
        Ok(Self {
            model_name: config.model.clone(),
            model: config_to_fastembed_model(&config.model)?,
            query_prefix,
            passage_prefix,
            dims: config.dims,
            batch_size: config.batch_size,
            loaded: OnceCell::new(),
        })
    }

    async fn load(&self) -> Result<SharedModel> {
        let model = self.model.clone();
        let name = self.model_name.clone();
        let loaded = self
            .loaded
            .get_or_init(|| async move {
                info!(model = %name, "loading local embedding model");
                let init = tokio::task::spawn_blocking(move || {
                    fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                })
                .await;
                match init {
                    Ok(Ok(embedder)) => Ok(Arc::new(Mutex::new(embedder))),
                    Ok(Err(e)) => Err(format!("failed to load model '{}': {}", name, e)),
                    Err(e) => Err(format!("model loader task failed: {}", e)),
                }
            })
            .await;

        loaded
            .clone()
            .map_err(Error::EmbeddingBackendUnavailable)
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let shared = self.load().await?;
        let count = texts.len();
        let batch_size = self.batch_size;

        let vectors = tokio::task::spawn_blocking(move || {
            let mut embedder = shared
                .lock()
                .map_err(|_| Error::Embedding("local embedding model lock poisoned".into()))?;
            embedder
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::Embedding(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::Embedding(format!("local embedding task failed: {}", e)))??;

        check_vectors(vectors, count, self.dims)
    }
}

#[async_trait]
impl EmbeddingBackend for LocalBackend {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs = texts
            .iter()
            .map(|t| format!("{}{}", self.passage_prefix, t))
            .collect();
        self.run(inputs).await
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.run(vec![format!("{}{}", self.query_prefix, query)])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("local model returned no vector for the query".into()))
    }
}

/// Query and passage instructions the model was trained with.
fn prompt_prefixes(name: &str) -> (&'static str, &'static str) {
    match name {
        "bge-small-zh-v1.5" => ("为这个句子生成表示以用于检索相关文章：", ""),
        "bge-small-en-v1.5" | "bge-base-en-v1.5" => {
            ("Represent this sentence for searching relevant passages: ", "")
        }
        "multilingual-e5-small" | "multilingual-e5-base" => ("query: ", "passage: "),
        _ => ("", ""),
    }
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "bge-small-zh-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallZHV15),
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        other => Err(Error::Config(format!(
            "unknown local embedding model '{}'. Supported models: \
             bge-small-zh-v1.5, all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
             multilingual-e5-small, multilingual-e5-base",
            other
        ))),
    }
}

//! Embedding backend trait and vector utilities.
//!
//! Defines the [`EmbeddingBackend`] trait that every semantic backend
//! implements, pure helpers for vector storage and similarity, and
//! [`HashEmbedder`], a deterministic feature-hashing backend that needs no
//! model files.
//!
//! The model-backed implementations (fastembed, Ollama) live in the
//! `memory-search` app crate.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::tokenize::index_terms;

/// A semantic embedding backend.
///
/// `embed` returns one vector per input text, in order. A backend that
/// cannot serve at all returns
/// [`Error::EmbeddingBackendUnavailable`](crate::error::Error::EmbeddingBackendUnavailable);
/// a single failed request returns
/// [`Error::Embedding`](crate::error::Error::Embedding).
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Model identifier recorded with every stored vector.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query. Models trained with a query instruction
    /// override this; the default embeds the query like a document.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("backend returned no vector for the query".to_string()))
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use memory_search_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing partial values are
/// ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Scale `vec` to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vec.iter_mut() {
            *value /= norm;
        }
    }
}

/// Deterministic FNV-1a feature-hashing embedder.
///
/// Terms come from the index tokenizer, so dense-script text contributes its
/// bigrams. Adjacent term pairs are added at half weight. Output is
/// L2-normalized.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            model: format!("hash-{}", dims),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dims];
        if self.dims == 0 {
            return embedding;
        }

        let terms = index_terms(text, 2);
        for term in &terms {
            accumulate(&mut embedding, term, 1.0);
        }
        for pair in terms.windows(2) {
            accumulate(&mut embedding, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        l2_normalize(&mut embedding);
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Spread `term` over a handful of signed buckets.
fn accumulate(embedding: &mut [f32], term: &str, weight: f32) {
    const BUCKETS_PER_TERM: u64 = 4;
    let term_hash = fnv1a(term.as_bytes());
    for salt in 0..BUCKETS_PER_TERM {
        let h = fnv1a_salted(term_hash, salt);
        let sign = if h & 1 == 0 { weight } else { -weight };
        let dim = ((h >> 1) as usize) % embedding.len();
        embedding[dim] += sign;
    }
}

fn fnv1a_salted(seed: u64, salt: u64) -> u64 {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8..].copy_from_slice(&salt.to_le_bytes());
    fnv1a(&bytes)
}

fn fnv1a(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

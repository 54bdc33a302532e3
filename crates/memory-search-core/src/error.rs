//! Error type shared by the core pipeline and the application crate.
//!
//! Component-local failures (one unreadable document, one failed embedding
//! batch) are contained by the indexer and only logged; the variants here
//! are what escapes to callers.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The semantic backend cannot serve at all (not configured, model
    /// missing, service unreachable). Callers degrade to keyword search.
    #[error("embedding backend unavailable: {0}")]
    EmbeddingBackendUnavailable(String),

    /// A single embedding request failed; the backend may still work.
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("failed to read document {}: {source}", path.display())]
    DocumentRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The on-disk index cannot be read. Recover with a full rebuild.
    #[error("index is corrupt or unreadable: {0}")]
    CorruptIndex(String),

    #[error("invalid query: {0}")]
    Query(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_corrupt_index(&self) -> bool {
        matches!(self, Error::CorruptIndex(_))
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Error::EmbeddingBackendUnavailable(_))
    }
}

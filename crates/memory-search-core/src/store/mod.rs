//! Storage abstraction for the index.
//!
//! The [`Store`] trait covers everything the indexer and the search pipeline
//! need: chunk rows with their full-text terms, embedding records, and a
//! small key/value table for index metadata. The SQLite implementation lives
//! in the app crate; [`memory::InMemoryStore`] backs the core tests.
//!
//! Every mutating call is atomic on its own. Readers running concurrently
//! with a rebuild see each chunk either before or after its update.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Category, Chunk, ChunkRef, EmbeddingRecord, RankedChunk, StoredChunk};

/// Metadata key holding the model of the stored embedding records.
pub const META_EMBEDDING_MODEL: &str = "embedding_model";
/// Metadata key holding the index schema version.
pub const META_SCHEMA_VERSION: &str = "schema_version";

/// Abstract index storage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`stored_chunks`](Store::stored_chunks) | Chunk identities and hashes, for reconciliation |
/// | [`upsert_chunk`](Store::upsert_chunk) | Insert or replace a chunk and its full-text row |
/// | [`delete_chunk`](Store::delete_chunk) | Remove a chunk, its full-text row and its embedding |
/// | [`keyword_search`](Store::keyword_search) | BM25-ranked full-text search |
/// | [`embedding_candidates`](Store::embedding_candidates) | Valid vectors for the active model |
/// | [`pending_embeddings`](Store::pending_embeddings) | Chunks lacking a valid vector |
#[async_trait]
pub trait Store: Send + Sync {
    async fn stored_chunks(&self) -> Result<Vec<StoredChunk>>;

    /// Insert or replace by chunk id. `terms` is the tokenized text indexed
    /// for full-text search.
    async fn upsert_chunk(&self, chunk: &Chunk, terms: &str) -> Result<()>;

    async fn delete_chunk(&self, id: &str) -> Result<()>;

    /// Remove every chunk, embedding and metadata entry except the schema
    /// version.
    async fn clear(&self) -> Result<()>;

    /// Fetch chunks by id. Unknown ids are skipped; order is unspecified.
    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>>;

    /// Chunks matching any of `terms`, best first, ranks from 1. Ties are
    /// broken by path, then ordinal.
    async fn keyword_search(
        &self,
        terms: &[String],
        limit: usize,
        category: Option<Category>,
    ) -> Result<Vec<RankedChunk>>;

    /// Every vector stored for `model` whose hash still matches its chunk.
    async fn embedding_candidates(
        &self,
        model: &str,
        category: Option<Category>,
    ) -> Result<Vec<(ChunkRef, Vec<f32>)>>;

    /// Chunks with no embedding record for `model` at their current hash,
    /// ordered by path, then ordinal.
    async fn pending_embeddings(&self, model: &str) -> Result<Vec<Chunk>>;

    async fn upsert_embedding(&self, record: &EmbeddingRecord) -> Result<()>;

    /// Delete records of every model other than `model`; returns the count.
    async fn purge_embeddings_except(&self, model: &str) -> Result<u64>;

    async fn meta(&self, key: &str) -> Result<Option<String>>;

    async fn set_meta(&self, key: &str, value: &str) -> Result<()>;
}

//! In-memory [`Store`] implementation for tests and embedders of the core
//! crate.
//!
//! Chunks live in a `BTreeMap` keyed by id behind `std::sync::RwLock`.
//! Keyword search scores with Okapi BM25 (`k1 = 1.2`, `b = 0.75`, the FTS5
//! defaults) over the stored terms; vector candidates are a plain scan.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{
    Category, Chunk, ChunkRef, EmbeddingRecord, RankSource, RankedChunk, StoredChunk,
};

use super::{Store, META_SCHEMA_VERSION};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

struct Entry {
    chunk: Chunk,
    terms: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<BTreeMap<String, Entry>>,
    embeddings: RwLock<HashMap<String, EmbeddingRecord>>,
    meta: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn embedding_record(&self, chunk_id: &str) -> Option<EmbeddingRecord> {
        self.embeddings.read().ok()?.get(chunk_id).cloned()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| Error::Storage("in-memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| Error::Storage("in-memory store lock poisoned".to_string()))
}

fn in_category(chunk: &Chunk, category: Option<Category>) -> bool {
    category.map_or(true, |c| chunk.category == c)
}

#[async_trait]
impl Store for InMemoryStore {
    async fn stored_chunks(&self) -> Result<Vec<StoredChunk>> {
        Ok(read(&self.chunks)?
            .values()
            .map(|e| StoredChunk::from(&e.chunk))
            .collect())
    }

    async fn upsert_chunk(&self, chunk: &Chunk, terms: &str) -> Result<()> {
        write(&self.chunks)?.insert(
            chunk.id.clone(),
            Entry {
                chunk: chunk.clone(),
                terms: terms.split_whitespace().map(str::to_string).collect(),
            },
        );
        Ok(())
    }

    async fn delete_chunk(&self, id: &str) -> Result<()> {
        write(&self.chunks)?.remove(id);
        write(&self.embeddings)?.remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        write(&self.chunks)?.clear();
        write(&self.embeddings)?.clear();
        write(&self.meta)?.retain(|k, _| k == META_SCHEMA_VERSION);
        Ok(())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let chunks = read(&self.chunks)?;
        Ok(ids
            .iter()
            .filter_map(|id| chunks.get(id).map(|e| e.chunk.clone()))
            .collect())
    }

    async fn keyword_search(
        &self,
        terms: &[String],
        limit: usize,
        category: Option<Category>,
    ) -> Result<Vec<RankedChunk>> {
        let chunks = read(&self.chunks)?;
        let docs: Vec<&Entry> = chunks
            .values()
            .filter(|e| in_category(&e.chunk, category))
            .collect();
        if docs.is_empty() || terms.is_empty() {
            return Ok(Vec::new());
        }

        let n = docs.len() as f64;
        let avg_len = docs.iter().map(|e| e.terms.len()).sum::<usize>() as f64 / n;
        let mut wanted: Vec<&str> = Vec::new();
        for term in terms {
            if !wanted.contains(&term.as_str()) {
                wanted.push(term);
            }
        }

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for entry in &docs {
            let present: HashSet<&str> = entry
                .terms
                .iter()
                .map(String::as_str)
                .filter(|t| wanted.contains(t))
                .collect();
            for t in present {
                *doc_freq.entry(t).or_default() += 1;
            }
        }

        let mut scored: Vec<(&Entry, f64)> = docs
            .iter()
            .filter_map(|entry| {
                let len = entry.terms.len() as f64;
                let mut score = 0.0;
                for term in &wanted {
                    let tf = entry.terms.iter().filter(|t| t.as_str() == *term).count() as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
                    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                    let norm = 1.0 - BM25_B + BM25_B * len / avg_len.max(1.0);
                    score += idf * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * norm);
                }
                (score > 0.0).then_some((*entry, score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.0.chunk.rel_path.cmp(&b.0.chunk.rel_path))
                .then(a.0.chunk.ordinal.cmp(&b.0.chunk.ordinal))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (entry, score))| RankedChunk {
                chunk: entry.chunk.chunk_ref(),
                source: RankSource::Keyword,
                rank: i + 1,
                // FTS5 convention: lower is better.
                raw_score: -score,
            })
            .collect())
    }

    async fn embedding_candidates(
        &self,
        model: &str,
        category: Option<Category>,
    ) -> Result<Vec<(ChunkRef, Vec<f32>)>> {
        let chunks = read(&self.chunks)?;
        let embeddings = read(&self.embeddings)?;
        Ok(chunks
            .values()
            .filter(|e| in_category(&e.chunk, category))
            .filter_map(|e| {
                let record = embeddings.get(&e.chunk.id)?;
                (record.model == model && record.hash == e.chunk.hash)
                    .then(|| (e.chunk.chunk_ref(), record.vector.clone()))
            })
            .collect())
    }

    async fn pending_embeddings(&self, model: &str) -> Result<Vec<Chunk>> {
        let chunks = read(&self.chunks)?;
        let embeddings = read(&self.embeddings)?;
        let mut pending: Vec<Chunk> = chunks
            .values()
            .filter(|e| {
                embeddings
                    .get(&e.chunk.id)
                    .map_or(true, |r| r.model != model || r.hash != e.chunk.hash)
            })
            .map(|e| e.chunk.clone())
            .collect();
        pending.sort_by(|a, b| {
            a.rel_path
                .cmp(&b.rel_path)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        Ok(pending)
    }

    async fn upsert_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        write(&self.embeddings)?.insert(record.chunk_id.clone(), record.clone());
        Ok(())
    }

    async fn purge_embeddings_except(&self, model: &str) -> Result<u64> {
        let mut embeddings = write(&self.embeddings)?;
        let before = embeddings.len();
        embeddings.retain(|_, r| r.model == model);
        Ok((before - embeddings.len()) as u64)
    }

    async fn meta(&self, key: &str) -> Result<Option<String>> {
        Ok(read(&self.meta)?.get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        write(&self.meta)?.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_document, ChunkingParams};
    use crate::tokenize::{index_text, query_terms};

    async fn store_with(docs: &[(&str, &str)]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for (path, text) in docs {
            let category = Category::from_rel_path(path);
            for chunk in chunk_document(path, path, category, text, &ChunkingParams::default()) {
                store.upsert_chunk(&chunk, &index_text(&chunk.text, 2)).await.unwrap();
            }
        }
        store
    }

    #[tokio::test]
    async fn test_keyword_search_ranks_by_bm25() {
        let store = store_with(&[
            ("a.md", "foo bar baz"),
            ("b.md", "foo foo foo bar"),
            ("c.md", "unrelated"),
        ])
        .await;
        let hits = store
            .keyword_search(&query_terms("foo", 2), 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.rel_path, "b.md");
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[1].rank, 2);
    }

    #[tokio::test]
    async fn test_keyword_search_category_filter() {
        let store = store_with(&[
            ("daily/2026-01-01.md", "deploy went fine"),
            ("sessions/s1.md", "deploy failed twice"),
        ])
        .await;
        let hits = store
            .keyword_search(&query_terms("deploy", 2), 10, Some(Category::Session))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.rel_path, "sessions/s1.md");
    }

    #[tokio::test]
    async fn test_stale_embedding_is_pending_and_hidden() {
        let store = store_with(&[("a.md", "alpha")]).await;
        let chunk = store.get_chunks(&[crate::chunk::chunk_id("a.md", 0)]).await.unwrap()[0].clone();
        store
            .upsert_embedding(&EmbeddingRecord {
                chunk_id: chunk.id.clone(),
                hash: "old".into(),
                model: "m".into(),
                vector: vec![1.0],
            })
            .await
            .unwrap();
        assert!(store.embedding_candidates("m", None).await.unwrap().is_empty());
        assert_eq!(store.pending_embeddings("m").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_keeps_schema_version() {
        let store = store_with(&[("a.md", "alpha")]).await;
        store.set_meta(META_SCHEMA_VERSION, "1").await.unwrap();
        store.set_meta("embedding_model", "m").await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.chunk_count(), 0);
        assert_eq!(store.meta(META_SCHEMA_VERSION).await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.meta("embedding_model").await.unwrap(), None);
    }
}

//! Index reconciliation and embedding refresh.
//!
//! [`rebuild`] brings a [`Store`] in line with a scanned corpus:
//!
//! 1. Chunk every readable document and compare against the stored chunks by
//!    id. New ids are inserted, changed ones replaced, surplus ordinals
//!    deleted. Unchanged chunks are not written at all.
//! 2. Delete every chunk of a stored path that is no longer in the corpus.
//!    Unreadable documents keep their previous chunks.
//! 3. If an embedding backend is present, purge vectors from other models
//!    and embed every chunk without a valid vector, batch by batch.
//!
//! Every write is keyed by chunk id, so an interrupted rebuild is finished by
//! simply running the next one.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::chunk::{chunk_document, ChunkingParams};
use crate::embedding::EmbeddingBackend;
use crate::error::{Error, Result};
use crate::models::{
    Chunk, CorpusEntry, DegradeReason, EmbeddingRecord, RebuildMode, RebuildReport, StoredChunk,
};
use crate::store::{Store, META_EMBEDDING_MODEL};
use crate::tokenize::{index_text, DEFAULT_NGRAM_WIDTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexParams {
    pub chunking: ChunkingParams,
    pub ngram_width: usize,
    pub batch_size: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            chunking: ChunkingParams::default(),
            ngram_width: DEFAULT_NGRAM_WIDTH,
            batch_size: 64,
        }
    }
}

/// Run a full or incremental rebuild over `corpus`.
///
/// `backend` is `None` when embeddings are disabled; the report then carries
/// [`DegradeReason::EmbeddingDisabled`].
pub async fn rebuild<S: Store + ?Sized>(
    store: &S,
    corpus: &[CorpusEntry],
    backend: Option<&dyn EmbeddingBackend>,
    mode: RebuildMode,
    params: &IndexParams,
) -> Result<RebuildReport> {
    let mut report = RebuildReport::default();

    if mode == RebuildMode::Full {
        info!("full rebuild: clearing index");
        store.clear().await?;
    }

    reconcile(store, corpus, params, &mut report).await?;

    match backend {
        Some(backend) => refresh_embeddings(store, backend, params.batch_size, &mut report).await?,
        None => report.degraded = Some(DegradeReason::EmbeddingDisabled),
    }

    info!(
        documents = report.documents_indexed,
        skipped = report.documents_skipped,
        added = report.chunks_added,
        updated = report.chunks_updated,
        removed = report.chunks_removed,
        unchanged = report.chunks_unchanged,
        embedded = report.embeddings_written,
        "rebuild finished"
    );

    Ok(report)
}

/// Reconcile stored chunks with the corpus.
pub async fn reconcile<S: Store + ?Sized>(
    store: &S,
    corpus: &[CorpusEntry],
    params: &IndexParams,
    report: &mut RebuildReport,
) -> Result<()> {
    let mut stored_by_path: BTreeMap<String, Vec<StoredChunk>> = BTreeMap::new();
    for stored in store.stored_chunks().await? {
        stored_by_path
            .entry(stored.rel_path.clone())
            .or_default()
            .push(stored);
    }

    let mut seen: HashSet<&str> = HashSet::new();

    for entry in corpus {
        seen.insert(entry.rel_path());

        let doc = match entry {
            CorpusEntry::Readable(doc) => doc,
            CorpusEntry::Unreadable { rel_path, reason } => {
                warn!(path = %rel_path, reason = %reason, "document unreadable, keeping previous chunks");
                report.documents_skipped += 1;
                continue;
            }
        };
        report.newest_document = report.newest_document.max(Some(doc.modified));

        let chunks = chunk_document(
            &doc.rel_path,
            &doc.title,
            doc.category,
            &doc.text,
            &params.chunking,
        );
        let previous: HashMap<&str, &StoredChunk> = stored_by_path
            .get(&doc.rel_path)
            .map(|v| v.iter().map(|s| (s.id.as_str(), s)).collect())
            .unwrap_or_default();

        for chunk in &chunks {
            match previous.get(chunk.id.as_str()) {
                None => {
                    write_chunk(store, chunk, params).await?;
                    report.chunks_added += 1;
                }
                Some(prev) if !chunk.matches_stored(prev) => {
                    write_chunk(store, chunk, params).await?;
                    report.chunks_updated += 1;
                }
                Some(_) => report.chunks_unchanged += 1,
            }
        }

        let live: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        for prev in previous.values().filter(|p| !live.contains(p.id.as_str())) {
            store.delete_chunk(&prev.id).await?;
            report.chunks_removed += 1;
        }

        debug!(path = %doc.rel_path, chunks = chunks.len(), "document reconciled");
        report.documents_indexed += 1;
    }

    for (path, stale) in stored_by_path.iter().filter(|(p, _)| !seen.contains(p.as_str())) {
        debug!(path = %path, chunks = stale.len(), "document gone, removing chunks");
        for chunk in stale {
            store.delete_chunk(&chunk.id).await?;
            report.chunks_removed += 1;
        }
    }

    Ok(())
}

async fn write_chunk<S: Store + ?Sized>(store: &S, chunk: &Chunk, params: &IndexParams) -> Result<()> {
    store
        .upsert_chunk(chunk, &chunk_terms(chunk, params.ngram_width))
        .await
}

/// Full-text terms for a chunk: its title, then its body.
pub fn chunk_terms(chunk: &Chunk, ngram_width: usize) -> String {
    index_text(&format!("{}\n{}", chunk.title, chunk.text), ngram_width)
}

/// Align stored vectors with the active model and embed every pending chunk.
///
/// Stops early, leaving the rest pending, when the backend reports itself
/// unavailable. A failed batch is counted and skipped.
pub async fn refresh_embeddings<S: Store + ?Sized>(
    store: &S,
    backend: &dyn EmbeddingBackend,
    batch_size: usize,
    report: &mut RebuildReport,
) -> Result<()> {
    let model = backend.model_name();

    if store.meta(META_EMBEDDING_MODEL).await?.as_deref() != Some(model) {
        let purged = store.purge_embeddings_except(model).await?;
        store.set_meta(META_EMBEDDING_MODEL, model).await?;
        if purged > 0 {
            info!(model, purged, "embedding model changed, dropped old vectors");
        }
        report.embeddings_purged += purged;
    }

    let pending = store.pending_embeddings(model).await?;
    if pending.is_empty() {
        return Ok(());
    }
    debug!(model, pending = pending.len(), "embedding pending chunks");

    let mut batches = pending.chunks(batch_size.max(1));
    while let Some(batch) = batches.next() {
        let inputs: Vec<String> = batch.iter().map(Chunk::embedding_input).collect();
        match backend.embed(&inputs).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                for (chunk, vector) in batch.iter().zip(vectors) {
                    store
                        .upsert_embedding(&EmbeddingRecord {
                            chunk_id: chunk.id.clone(),
                            hash: chunk.hash.clone(),
                            model: model.to_string(),
                            vector,
                        })
                        .await?;
                    report.embeddings_written += 1;
                }
            }
            Ok(vectors) => {
                warn!(
                    expected = batch.len(),
                    got = vectors.len(),
                    "embedding batch returned wrong number of vectors"
                );
                report.embeddings_failed += batch.len() as u64;
            }
            Err(Error::EmbeddingBackendUnavailable(reason)) => {
                warn!(reason = %reason, "embedding backend unavailable, leaving chunks pending");
                let remaining: usize = batches.by_ref().map(<[Chunk]>::len).sum();
                report.embeddings_pending += (batch.len() + remaining) as u64;
                report.degraded = Some(DegradeReason::EmbeddingUnavailable(reason));
                break;
            }
            Err(e) => {
                warn!(error = %e, size = batch.len(), "embedding batch failed");
                report.embeddings_failed += batch.len() as u64;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::{Category, Document};
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(rel_path: &str, text: &str) -> CorpusEntry {
        CorpusEntry::Readable(Document {
            path: PathBuf::from(rel_path),
            rel_path: rel_path.to_string(),
            category: Category::from_rel_path(rel_path),
            title: rel_path.rsplit('/').next().unwrap_or(rel_path).to_string(),
            text: text.to_string(),
            modified: Utc::now(),
        })
    }

    fn params() -> IndexParams {
        IndexParams {
            batch_size: 2,
            ..IndexParams::default()
        }
    }

    #[tokio::test]
    async fn test_incremental_reconcile_counts() {
        let store = InMemoryStore::new();
        let corpus = vec![
            doc("a.md", "# One\nalpha\n\n# Two\nbeta\n"),
            doc("b.md", "gamma"),
        ];
        let first = rebuild(&store, &corpus, None, RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert_eq!(first.chunks_added, 3);
        assert_eq!(first.documents_indexed, 2);
        assert_eq!(first.degraded, Some(DegradeReason::EmbeddingDisabled));

        let again = rebuild(&store, &corpus, None, RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert!(!again.changed());
        assert_eq!(again.chunks_unchanged, 3);

        let edited = vec![doc("a.md", "# One\nalpha changed\n"), doc("b.md", "gamma")];
        let third = rebuild(&store, &edited, None, RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert_eq!(third.chunks_updated, 1);
        assert_eq!(third.chunks_removed, 1);
        assert_eq!(third.chunks_unchanged, 1);
        assert_eq!(store.chunk_count(), 2);
    }

    #[tokio::test]
    async fn test_fact_ids_are_searchable() {
        let store = InMemoryStore::new();
        let corpus = vec![doc(
            "areas/projects/x/facts.json",
            r#"{"facts": [{"id": "pool-sizing", "fact": "Connections capped at 20", "status": "active"}]}"#,
        )];
        rebuild(&store, &corpus, None, RebuildMode::Incremental, &params())
            .await
            .unwrap();

        let hits = store
            .keyword_search(&["sizing".to_string()], 10, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.rel_path, "areas/projects/x/facts.json");
    }

    #[tokio::test]
    async fn test_report_tracks_newest_document() {
        let store = InMemoryStore::new();
        let older = Utc::now() - chrono::Duration::days(3);
        let newer = Utc::now();
        let mut corpus = vec![doc("a.md", "alpha"), doc("b.md", "beta")];
        if let CorpusEntry::Readable(d) = &mut corpus[0] {
            d.modified = newer;
        }
        if let CorpusEntry::Readable(d) = &mut corpus[1] {
            d.modified = older;
        }
        corpus.push(CorpusEntry::Unreadable {
            rel_path: "c.md".into(),
            reason: "denied".into(),
        });

        let report = rebuild(&store, &corpus, None, RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert_eq!(report.newest_document, Some(newer));

        let empty = rebuild(&InMemoryStore::new(), &[], None, RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert_eq!(empty.newest_document, None);
    }

    #[tokio::test]
    async fn test_deleted_document_removed() {
        let store = InMemoryStore::new();
        let corpus = vec![doc("a.md", "alpha"), doc("b.md", "beta")];
        rebuild(&store, &corpus, None, RebuildMode::Incremental, &params())
            .await
            .unwrap();
        let report = rebuild(&store, &corpus[..1], None, RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert_eq!(report.chunks_removed, 1);
        let hits = store
            .keyword_search(&["beta".to_string()], 10, None)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_document_keeps_chunks() {
        let store = InMemoryStore::new();
        rebuild(&store, &[doc("a.md", "alpha")], None, RebuildMode::Incremental, &params())
            .await
            .unwrap();
        let corpus = vec![CorpusEntry::Unreadable {
            rel_path: "a.md".into(),
            reason: "permission denied".into(),
        }];
        let report = rebuild(&store, &corpus, None, RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert_eq!(report.documents_skipped, 1);
        assert_eq!(report.chunks_removed, 0);
        assert_eq!(store.chunk_count(), 1);
    }

    #[tokio::test]
    async fn test_embeddings_follow_content_hash() {
        let store = InMemoryStore::new();
        let backend = HashEmbedder::new(32);
        let report = rebuild(
            &store,
            &[doc("a.md", "alpha")],
            Some(&backend),
            RebuildMode::Incremental,
            &params(),
        )
        .await
        .unwrap();
        assert_eq!(report.embeddings_written, 1);
        assert_eq!(report.degraded, None);

        let id = crate::chunk::chunk_id("a.md", 0);
        let before = store.embedding_record(&id).unwrap();

        let report = rebuild(
            &store,
            &[doc("a.md", "alpha beta")],
            Some(&backend),
            RebuildMode::Incremental,
            &params(),
        )
        .await
        .unwrap();
        assert_eq!(report.embeddings_written, 1);
        let after = store.embedding_record(&id).unwrap();
        assert_ne!(before.hash, after.hash);
        assert_eq!(after.hash, crate::chunk::content_hash("alpha beta"));
    }

    #[tokio::test]
    async fn test_model_change_purges_vectors() {
        let store = InMemoryStore::new();
        let corpus = vec![doc("a.md", "alpha")];
        rebuild(&store, &corpus, Some(&HashEmbedder::new(16)), RebuildMode::Incremental, &params())
            .await
            .unwrap();
        let report = rebuild(&store, &corpus, Some(&HashEmbedder::new(8)), RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert_eq!(report.embeddings_purged, 1);
        assert_eq!(report.embeddings_written, 1);
        assert_eq!(store.meta(META_EMBEDDING_MODEL).await.unwrap().as_deref(), Some("hash-8"));
    }

    struct FlakyBackend {
        calls: AtomicUsize,
        fail_on: usize,
        unavailable_on: Option<usize>,
    }

    #[async_trait]
    impl EmbeddingBackend for FlakyBackend {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(call) == self.unavailable_on {
                return Err(Error::EmbeddingBackendUnavailable("gone".into()));
            }
            if call == self.fail_on {
                return Err(Error::Embedding("timeout".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn five_docs() -> Vec<CorpusEntry> {
        (0..5).map(|i| doc(&format!("d{}.md", i), &format!("doc number {}", i))).collect()
    }

    #[tokio::test]
    async fn test_failed_batch_is_contained() {
        let store = InMemoryStore::new();
        let backend = FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_on: 0,
            unavailable_on: None,
        };
        let report = rebuild(&store, &five_docs(), Some(&backend), RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert_eq!(report.embeddings_failed, 2);
        assert_eq!(report.embeddings_written, 3);
        assert_eq!(report.degraded, None);

        // The failed chunks are retried on the next rebuild.
        let report = rebuild(&store, &five_docs(), Some(&backend), RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert_eq!(report.embeddings_written, 2);
    }

    #[tokio::test]
    async fn test_unavailable_backend_stops_embedding() {
        let store = InMemoryStore::new();
        let backend = FlakyBackend {
            calls: AtomicUsize::new(0),
            fail_on: usize::MAX,
            unavailable_on: Some(1),
        };
        let report = rebuild(&store, &five_docs(), Some(&backend), RebuildMode::Incremental, &params())
            .await
            .unwrap();
        assert_eq!(report.embeddings_written, 2);
        assert_eq!(report.embeddings_pending, 3);
        assert_eq!(report.chunks_added, 5);
        assert!(matches!(report.degraded, Some(DegradeReason::EmbeddingUnavailable(_))));
    }

    #[tokio::test]
    async fn test_full_rebuild_rewrites_everything() {
        let store = InMemoryStore::new();
        let corpus = vec![doc("a.md", "alpha")];
        rebuild(&store, &corpus, None, RebuildMode::Incremental, &params())
            .await
            .unwrap();
        let report = rebuild(&store, &corpus, None, RebuildMode::Full, &params())
            .await
            .unwrap();
        assert_eq!(report.chunks_added, 1);
        assert_eq!(report.chunks_unchanged, 0);
    }
}

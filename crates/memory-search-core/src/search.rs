//! Query pipeline: keyword and vector retrieval, rank fusion, deduplication.
//!
//! The pipeline runs entirely through the [`Store`] and
//! [`EmbeddingBackend`] traits. The app crate supplies the concrete store
//! and backend and maps its config onto [`SearchParams`].
//!
//! # Pipeline
//!
//! 1. Reject empty queries and queries with no searchable terms.
//! 2. Unless the mode is `bm25`, embed the query and rank valid vectors by
//!    cosine similarity. A missing or unavailable backend degrades the query
//!    to `bm25` and records why.
//! 3. Unless the (effective) mode is `vector`, run BM25 over the full-text
//!    index with the tokenized query.
//! 4. Fuse with RRF, keep the top `candidate_pool`, and drop near-duplicates
//!    until `limit` results remain.

use std::collections::HashMap;

use tracing::debug;

use crate::chunk::normalize_text;
use crate::dedup::{dedup, DEFAULT_DEDUP_THRESHOLD};
use crate::embedding::{cosine_similarity, EmbeddingBackend};
use crate::error::{Error, Result};
use crate::fusion::{fuse, DEFAULT_RRF_K};
use crate::models::{
    Category, Chunk, DegradeReason, RankSource, RankedChunk, SearchMode, SearchOutcome,
    SearchRequest, SearchResult,
};
use crate::store::Store;
use crate::tokenize::{query_terms, DEFAULT_NGRAM_WIDTH};

/// Marks placed around query terms in snippets.
pub const HIGHLIGHT_OPEN: &str = ">>>";
pub const HIGHLIGHT_CLOSE: &str = "<<<";

/// Retrieval tuning, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub rrf_k: f64,
    pub dedup_threshold: f64,
    /// Results returned when the request gives no limit.
    pub result_count: usize,
    /// Candidates fetched from each retriever and kept after fusion.
    pub candidate_pool: usize,
    pub ngram_width: usize,
    pub snippet_chars: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            result_count: 6,
            candidate_pool: 20,
            ngram_width: DEFAULT_NGRAM_WIDTH,
            snippet_chars: 160,
        }
    }
}

/// Run one query.
///
/// `backend` is `None` when embeddings are disabled.
pub async fn search<S: Store + ?Sized>(
    store: &S,
    backend: Option<&dyn EmbeddingBackend>,
    req: &SearchRequest,
    params: &SearchParams,
) -> Result<SearchOutcome> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(Error::Query("query is empty".to_string()));
    }
    let terms = query_terms(query, params.ngram_width);
    if terms.is_empty() {
        return Err(Error::Query(format!("'{}' has no searchable terms", query)));
    }
    let limit = req.limit.unwrap_or(params.result_count);
    if limit == 0 {
        return Err(Error::Query("limit must be at least 1".to_string()));
    }
    let pool = params.candidate_pool.max(limit);

    let mut degraded = None;
    let vector_list = if req.mode == SearchMode::Bm25 {
        Vec::new()
    } else {
        match backend {
            None => {
                degraded = Some(DegradeReason::EmbeddingDisabled);
                Vec::new()
            }
            Some(backend) => match vector_search(store, backend, query, pool, req.category).await {
                Ok(list) => list,
                Err(Error::EmbeddingBackendUnavailable(reason)) | Err(Error::Embedding(reason)) => {
                    degraded = Some(DegradeReason::EmbeddingUnavailable(reason));
                    Vec::new()
                }
                Err(e) => return Err(e),
            },
        }
    };

    let mode = if degraded.is_some() {
        SearchMode::Bm25
    } else {
        req.mode
    };

    let keyword_list = if mode == SearchMode::Vector {
        Vec::new()
    } else {
        store.keyword_search(&terms, pool, req.category).await?
    };

    debug!(
        query,
        mode = %mode,
        keyword = keyword_list.len(),
        vector = vector_list.len(),
        "retrieved candidates"
    );

    let mut fused = fuse(&[keyword_list, vector_list], params.rrf_k);
    fused.truncate(pool);

    let ids: Vec<String> = fused.iter().map(|c| c.chunk.id.clone()).collect();
    let chunks: HashMap<String, Chunk> = store
        .get_chunks(&ids)
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();

    let joined = fused
        .into_iter()
        .filter_map(|candidate| chunks.get(&candidate.chunk.id).map(|chunk| (candidate, chunk)));
    let kept = dedup(joined, |(_, chunk)| chunk.text.as_str(), params.dedup_threshold, limit);

    let results = kept
        .into_iter()
        .enumerate()
        .map(|(i, (candidate, chunk))| SearchResult {
            chunk_id: chunk.id.clone(),
            path: chunk.rel_path.clone(),
            ordinal: chunk.ordinal,
            line_start: chunk.line_start,
            line_end: chunk.line_end,
            category: chunk.category,
            title: chunk.title.clone(),
            snippet: make_snippet(&chunk.text, &terms, params.snippet_chars),
            score: candidate.score,
            rank: i + 1,
            keyword_rank: candidate.keyword_rank,
            vector_rank: candidate.vector_rank,
        })
        .collect();

    Ok(SearchOutcome {
        query: query.to_string(),
        mode,
        results,
        degraded,
    })
}

/// Rank valid stored vectors by cosine similarity to the embedded query.
pub async fn vector_search<S: Store + ?Sized>(
    store: &S,
    backend: &dyn EmbeddingBackend,
    query: &str,
    limit: usize,
    category: Option<Category>,
) -> Result<Vec<RankedChunk>> {
    let query_vec = backend.embed_query(query).await?;

    let mut scored: Vec<_> = store
        .embedding_candidates(backend.model_name(), category)
        .await?
        .into_iter()
        .map(|(chunk, vector)| (chunk, cosine_similarity(&query_vec, &vector) as f64))
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.tie_order(&b.0)));
    scored.truncate(limit);

    Ok(scored
        .into_iter()
        .enumerate()
        .map(|(i, (chunk, similarity))| RankedChunk {
            chunk,
            source: RankSource::Vector,
            rank: i + 1,
            raw_score: similarity,
        })
        .collect())
}

/// Build a one-line excerpt of at most `max_chars` characters (plus markers
/// and ellipses) around the first query term, with every term occurrence
/// wrapped in [`HIGHLIGHT_OPEN`]/[`HIGHLIGHT_CLOSE`].
pub fn make_snippet(text: &str, terms: &[String], max_chars: usize) -> String {
    let chars: Vec<char> = normalize_text(text).chars().collect();
    if chars.is_empty() || max_chars == 0 {
        return String::new();
    }
    let lower: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();

    let mut marked = vec![false; chars.len()];
    let mut first_hit: Option<usize> = None;
    for term in terms {
        let needle: Vec<char> = term.chars().collect();
        if needle.is_empty() || needle.len() > lower.len() {
            continue;
        }
        for start in 0..=lower.len() - needle.len() {
            if lower[start..start + needle.len()] == needle[..] {
                marked[start..start + needle.len()].fill(true);
                first_hit = Some(first_hit.map_or(start, |f| f.min(start)));
            }
        }
    }

    let mut start = first_hit.map_or(0, |hit| hit.saturating_sub(max_chars / 4));
    let end = (start + max_chars).min(chars.len());
    if end - start < max_chars {
        start = end.saturating_sub(max_chars);
    }

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    let mut open = false;
    for i in start..end {
        if marked[i] && !open {
            out.push_str(HIGHLIGHT_OPEN);
            open = true;
        } else if !marked[i] && open {
            out.push_str(HIGHLIGHT_CLOSE);
            open = false;
        }
        out.push(chars[i]);
    }
    if open {
        out.push_str(HIGHLIGHT_CLOSE);
    }
    if end < chars.len() {
        out.push_str("...");
    }
    out
}

//! Reciprocal rank fusion.
//!
//! Each chunk's fused score is `Σ 1 / (k + rank)` over the ranked lists that
//! contain it. Only ranks matter, so BM25 scores and cosine similarities
//! never need to share a scale. Ties are broken by path, then ordinal, so
//! the output order is total and reproducible.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{ChunkRef, RankSource, RankedChunk};

pub const DEFAULT_RRF_K: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedCandidate {
    pub chunk: ChunkRef,
    pub score: f64,
    pub keyword_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

/// Fuse any number of ranked lists. Empty lists contribute nothing.
pub fn fuse(lists: &[Vec<RankedChunk>], k: f64) -> Vec<FusedCandidate> {
    let mut by_id: HashMap<&str, FusedCandidate> = HashMap::new();

    for list in lists {
        for item in list {
            let entry = by_id
                .entry(item.chunk.id.as_str())
                .or_insert_with(|| FusedCandidate {
                    chunk: item.chunk.clone(),
                    score: 0.0,
                    keyword_rank: None,
                    vector_rank: None,
                });
            entry.score += 1.0 / (k + item.rank as f64);
            let slot = match item.source {
                RankSource::Keyword => &mut entry.keyword_rank,
                RankSource::Vector => &mut entry.vector_rank,
            };
            *slot = Some(slot.map_or(item.rank, |r| r.min(item.rank)));
        }
    }

    let mut fused: Vec<FusedCandidate> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.tie_order(&b.chunk))
    });
    fused
}

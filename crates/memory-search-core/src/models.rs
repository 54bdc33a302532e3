//! Data models that flow through indexing and retrieval.
//!
//! These types are storage-agnostic: the SQLite store in the app crate and
//! the [`InMemoryStore`](crate::store::memory::InMemoryStore) both speak them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Kind of knowledge a document holds, derived from where it lives in the
/// corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    ProjectSummary,
    Rule,
    Fact,
    Pattern,
    Tool,
    Daily,
    Session,
    Memory,
    Schema,
    Other,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::ProjectSummary,
        Category::Rule,
        Category::Fact,
        Category::Pattern,
        Category::Tool,
        Category::Daily,
        Category::Session,
        Category::Memory,
        Category::Schema,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::ProjectSummary => "project-summary",
            Category::Rule => "rule",
            Category::Fact => "fact",
            Category::Pattern => "pattern",
            Category::Tool => "tool",
            Category::Daily => "daily",
            Category::Session => "session",
            Category::Memory => "memory",
            Category::Schema => "schema",
            Category::Other => "other",
        }
    }

    /// Classify a document by its `/`-separated path relative to the corpus
    /// root. The first matching rule wins.
    pub fn from_rel_path(rel_path: &str) -> Self {
        let rel = rel_path.replace('\\', "/");
        let file_name = rel.rsplit('/').next().unwrap_or(rel.as_str());
        let in_projects = rel.starts_with("areas/projects/");

        if rel.starts_with("areas/projects/shared-db/") {
            Category::Schema
        } else if in_projects && file_name == "rules.md" {
            Category::Rule
        } else if in_projects && file_name == "summary.md" {
            Category::ProjectSummary
        } else if in_projects && file_name.ends_with("facts.json") {
            Category::Fact
        } else if rel.starts_with("areas/patterns/") {
            Category::Pattern
        } else if rel.starts_with("areas/tools/") {
            Category::Tool
        } else if rel.starts_with("daily/") {
            Category::Daily
        } else if rel.starts_with("sessions/") {
            Category::Session
        } else if rel == "MEMORY.md" {
            Category::Memory
        } else {
            Category::Other
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        // Plural directory-style names are accepted as aliases.
        let wanted = match wanted.as_str() {
            "rules" => "rule",
            "facts" => "fact",
            "patterns" => "pattern",
            "tools" => "tool",
            "sessions" => "session",
            "summary" => "project-summary",
            other => other,
        };
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| Error::Query(format!("unknown category '{}'", s)))
    }
}

/// A document read from the corpus.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    /// Path relative to the corpus root, always `/`-separated.
    pub rel_path: String,
    pub category: Category,
    /// File name, used as the fallback chunk title.
    pub title: String,
    pub text: String,
    pub modified: DateTime<Utc>,
}

/// One scanned corpus path handed to the indexer.
///
/// An unreadable document keeps its slot so the indexer can tell "could not
/// read" apart from "was deleted" and leave the previous chunks alone.
#[derive(Debug, Clone)]
pub enum CorpusEntry {
    Readable(Document),
    Unreadable { rel_path: String, reason: String },
}

impl CorpusEntry {
    pub fn rel_path(&self) -> &str {
        match self {
            CorpusEntry::Readable(doc) => &doc.rel_path,
            CorpusEntry::Unreadable { rel_path, .. } => rel_path,
        }
    }
}

/// A contiguous span of a document; the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// UUIDv5 of `"{rel_path}#{ordinal}"`.
    pub id: String,
    pub rel_path: String,
    pub ordinal: i64,
    /// 1-based, inclusive.
    pub line_start: i64,
    pub line_end: i64,
    pub category: Category,
    pub title: String,
    pub text: String,
    /// SHA-256 hex of the whitespace-normalized text.
    pub hash: String,
}

impl Chunk {
    pub fn chunk_ref(&self) -> ChunkRef {
        ChunkRef {
            id: self.id.clone(),
            rel_path: self.rel_path.clone(),
            ordinal: self.ordinal,
        }
    }

    /// Text handed to the embedding backend.
    pub fn embedding_input(&self) -> String {
        format!("{}: {}", self.title, self.text)
    }

    /// True when the stored row already holds exactly this chunk.
    pub fn matches_stored(&self, stored: &StoredChunk) -> bool {
        self.hash == stored.hash
            && self.title == stored.title
            && self.category == stored.category
            && self.line_start == stored.line_start
            && self.line_end == stored.line_end
    }
}

/// Chunk row as seen by the reconciler, without its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub id: String,
    pub rel_path: String,
    pub ordinal: i64,
    pub line_start: i64,
    pub line_end: i64,
    pub category: Category,
    pub title: String,
    pub hash: String,
}

impl From<&Chunk> for StoredChunk {
    fn from(chunk: &Chunk) -> Self {
        Self {
            id: chunk.id.clone(),
            rel_path: chunk.rel_path.clone(),
            ordinal: chunk.ordinal,
            line_start: chunk.line_start,
            line_end: chunk.line_end,
            category: chunk.category,
            title: chunk.title.clone(),
            hash: chunk.hash.clone(),
        }
    }
}

/// Identity of a chunk plus the keys used for deterministic tie-breaking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ChunkRef {
    pub id: String,
    pub rel_path: String,
    pub ordinal: i64,
}

impl ChunkRef {
    pub fn tie_order(&self, other: &ChunkRef) -> std::cmp::Ordering {
        self.rel_path
            .cmp(&other.rel_path)
            .then(self.ordinal.cmp(&other.ordinal))
    }
}

/// Which retriever produced a ranked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankSource {
    Keyword,
    Vector,
}

/// One entry of a retriever's ranked list. `rank` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedChunk {
    pub chunk: ChunkRef,
    pub source: RankSource,
    pub rank: usize,
    /// BM25 (lower is better) or cosine similarity (higher is better).
    pub raw_score: f64,
}

/// A stored embedding vector. Valid only while `hash` equals the chunk's
/// current hash and `model` equals the active model.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub chunk_id: String,
    pub hash: String,
    pub model: String,
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    pub fn dims(&self) -> usize {
        self.vector.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Hybrid,
    Bm25,
    Vector,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::Bm25 => "bm25",
            SearchMode::Vector => "vector",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hybrid" => Ok(SearchMode::Hybrid),
            "bm25" | "keyword" => Ok(SearchMode::Bm25),
            "vector" | "semantic" => Ok(SearchMode::Vector),
            other => Err(Error::Query(format!(
                "unknown search mode '{}' (expected hybrid, bm25 or vector)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuildMode {
    #[default]
    Incremental,
    Full,
}

/// Why the vector path was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum DegradeReason {
    EmbeddingDisabled,
    EmbeddingUnavailable(String),
}

impl DegradeReason {
    pub fn code(&self) -> &'static str {
        match self {
            DegradeReason::EmbeddingDisabled => "embedding_disabled",
            DegradeReason::EmbeddingUnavailable(_) => "embedding_unavailable",
        }
    }
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::EmbeddingDisabled => f.write_str("embedding_disabled"),
            DegradeReason::EmbeddingUnavailable(detail) => {
                write!(f, "embedding_unavailable: {}", detail)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub category: Option<Category>,
    /// Defaults to the configured result count.
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::Hybrid,
            category: None,
            limit: None,
        }
    }

    pub fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub path: String,
    pub ordinal: i64,
    pub line_start: i64,
    pub line_end: i64,
    pub category: Category,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub rank: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    /// Mode that actually ran; `bm25` when a vector query degraded.
    pub mode: SearchMode,
    pub results: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<DegradeReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RebuildReport {
    pub documents_indexed: u64,
    pub documents_skipped: u64,
    pub chunks_added: u64,
    pub chunks_updated: u64,
    pub chunks_removed: u64,
    pub chunks_unchanged: u64,
    pub embeddings_written: u64,
    pub embeddings_failed: u64,
    /// Chunks left without a valid embedding because the backend went away.
    pub embeddings_pending: u64,
    pub embeddings_purged: u64,
    /// Latest modification time among the documents read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_document: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<DegradeReason>,
}

impl RebuildReport {
    pub fn changed(&self) -> bool {
        self.chunks_added + self.chunks_updated + self.chunks_removed > 0
    }
}

//! TOML configuration.
//!
//! Every section has defaults, so a minimal file only needs
//! `[corpus] root = "..."`. A leading `~` in `corpus.root` or `index.path`
//! expands to `$HOME`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use memory_search_core::chunk::ChunkingParams;
use memory_search_core::indexer::IndexParams;
use memory_search_core::search::SearchParams;
use memory_search_core::{Error, Result};

pub const PROVIDERS: [&str; 4] = ["disabled", "local", "ollama", "hash"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("data/memory-search.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    [
        "MEMORY.md",
        "areas/**/*.md",
        "areas/**/*.json",
        "daily/*.md",
        "sessions/*.md",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_window_overlap_chars")]
    pub window_overlap_chars: usize,
    #[serde(default = "default_ngram_width")]
    pub ngram_width: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            window_overlap_chars: default_window_overlap_chars(),
            ngram_width: default_ngram_width(),
        }
    }
}

fn default_max_chunk_chars() -> usize {
    1200
}
fn default_window_overlap_chars() -> usize {
    100
}
fn default_ngram_width() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,
    #[serde(default = "default_result_count")]
    pub result_count: usize,
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            dedup_threshold: default_dedup_threshold(),
            result_count: default_result_count(),
            candidate_pool: default_candidate_pool(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_dedup_threshold() -> f64 {
    0.83
}
fn default_result_count() -> usize {
    6
}
fn default_candidate_pool() -> usize {
    20
}
fn default_snippet_chars() -> usize {
    160
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            url: default_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "bge-small-zh-v1.5".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Defaults for everything but the two paths.
    pub fn new(corpus_root: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Self {
        Self {
            index: IndexConfig {
                path: index_path.into(),
            },
            corpus: CorpusConfig {
                root: corpus_root.into(),
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
                follow_symlinks: false,
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.max_chunk_chars == 0 {
            return Err(Error::Config("chunking.max_chunk_chars must be > 0".into()));
        }
        if c.window_overlap_chars >= c.max_chunk_chars {
            return Err(Error::Config(
                "chunking.window_overlap_chars must be < chunking.max_chunk_chars".into(),
            ));
        }
        if c.ngram_width == 0 {
            return Err(Error::Config("chunking.ngram_width must be >= 1".into()));
        }

        let r = &self.retrieval;
        if r.rrf_k.is_nan() || r.rrf_k <= 0.0 {
            return Err(Error::Config("retrieval.rrf_k must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&r.dedup_threshold) {
            return Err(Error::Config(
                "retrieval.dedup_threshold must be in [0.0, 1.0]".into(),
            ));
        }
        if r.result_count == 0 {
            return Err(Error::Config("retrieval.result_count must be >= 1".into()));
        }
        if r.candidate_pool == 0 {
            return Err(Error::Config("retrieval.candidate_pool must be >= 1".into()));
        }

        let e = &self.embedding;
        if !PROVIDERS.contains(&e.provider.as_str()) {
            return Err(Error::Config(format!(
                "unknown embedding provider '{}': must be one of {}",
                e.provider,
                PROVIDERS.join(", ")
            )));
        }
        if e.batch_size == 0 {
            return Err(Error::Config("embedding.batch_size must be >= 1".into()));
        }
        if e.is_enabled() {
            if e.dims == 0 {
                return Err(Error::Config(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    e.provider
                )));
            }
            if e.model.trim().is_empty() {
                return Err(Error::Config(format!(
                    "embedding.model must be set when provider is '{}'",
                    e.provider
                )));
            }
        }

        Ok(())
    }

    pub fn chunking_params(&self) -> ChunkingParams {
        ChunkingParams {
            max_chunk_chars: self.chunking.max_chunk_chars,
            window_overlap_chars: self.chunking.window_overlap_chars,
        }
    }

    pub fn index_params(&self) -> IndexParams {
        IndexParams {
            chunking: self.chunking_params(),
            ngram_width: self.chunking.ngram_width,
            batch_size: self.embedding.batch_size,
        }
    }

    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            rrf_k: self.retrieval.rrf_k,
            dedup_threshold: self.retrieval.dedup_threshold,
            result_count: self.retrieval.result_count,
            candidate_pool: self.retrieval.candidate_pool,
            ngram_width: self.chunking.ngram_width,
            snippet_chars: self.retrieval.snippet_chars,
        }
    }
}

/// Replace a leading `~` with `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let mut config: Config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;

    config.corpus.root = expand_home(&config.corpus.root);
    config.index.path = expand_home(&config.index.path);
    config.validate()?;

    Ok(config)
}

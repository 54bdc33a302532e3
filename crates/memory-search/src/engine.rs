//! The [`Engine`] handle: one open index plus its corpus and backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use memory_search_core::embedding::EmbeddingBackend;
use memory_search_core::models::{CorpusEntry, RebuildMode, RebuildReport, SearchOutcome, SearchRequest};
use memory_search_core::{indexer, search, Result};

use crate::config::Config;
use crate::corpus::scan_corpus;
use crate::db;
use crate::embedding::create_backend;
use crate::migrate::run_migrations;
use crate::sqlite_store::SqliteStore;
use crate::stats::{collect_stats, IndexStats};

pub struct Engine {
    config: Config,
    store: SqliteStore,
    backend: Option<Arc<dyn EmbeddingBackend>>,
    degrade_logged: AtomicBool,
}

impl Engine {
    /// Open (creating if missing) the index named by `config.index.path`.
    ///
    /// Fails with `Error::CorruptIndex` when the file is not a readable
    /// index; see [`Engine::open_reset`].
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let backend = create_backend(&config.embedding)?;

        let pool = db::connect(&config.index.path).await?;
        run_migrations(&pool).await?;

        info!(
            index = %config.index.path.display(),
            provider = %config.embedding.provider,
            "index opened"
        );

        Ok(Self {
            config,
            store: SqliteStore::new(pool),
            backend,
            degrade_logged: AtomicBool::new(false),
        })
    }

    /// Delete the index files and open a fresh, empty index.
    pub async fn open_reset(config: Config) -> Result<Self> {
        warn!(index = %config.index.path.display(), "removing index files");
        db::remove_index_files(&config.index.path)?;
        Self::open(config).await
    }

    /// Replace the configured backend.
    pub fn with_backend(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Bring the index up to date with the corpus.
    ///
    /// A full rebuild that hits a damaged page recreates the index files and
    /// runs once more on the fresh index, so corruption that only surfaces
    /// after open is still recoverable.
    pub async fn rebuild(&mut self, mode: RebuildMode) -> Result<RebuildReport> {
        let corpus = scan_corpus(&self.config.corpus)?;
        match self.rebuild_from(&corpus, mode).await {
            Err(err) if mode == RebuildMode::Full && err.is_corrupt_index() => {
                warn!(error = %err, "index is corrupt, recreating");
                self.reset().await?;
                self.rebuild_from(&corpus, mode).await
            }
            other => other,
        }
    }

    async fn rebuild_from(
        &self,
        corpus: &[CorpusEntry],
        mode: RebuildMode,
    ) -> Result<RebuildReport> {
        indexer::rebuild(
            &self.store,
            corpus,
            self.backend.as_deref(),
            mode,
            &self.config.index_params(),
        )
        .await
    }

    async fn reset(&mut self) -> Result<()> {
        self.store.pool().close().await;
        db::remove_index_files(&self.config.index.path)?;
        let pool = db::connect(&self.config.index.path).await?;
        run_migrations(&pool).await?;
        self.store = SqliteStore::new(pool);
        Ok(())
    }

    pub async fn search(&self, req: &SearchRequest) -> Result<SearchOutcome> {
        let outcome = search::search(
            &self.store,
            self.backend.as_deref(),
            req,
            &self.config.search_params(),
        )
        .await?;

        if let Some(reason) = &outcome.degraded {
            if !self.degrade_logged.swap(true, Ordering::Relaxed) {
                warn!(reason = %reason, "semantic search unavailable, using keyword results");
            }
        }

        Ok(outcome)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        collect_stats(self.store.pool(), &self.config.index.path).await
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}

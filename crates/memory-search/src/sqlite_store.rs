//! SQLite-backed [`Store`] implementation.
//!
//! Chunk rows live in `chunks`, their tokenized terms in the `chunks_fts`
//! FTS5 table, vectors in `embeddings` and metadata in `index_meta`. Each
//! mutating call runs in its own transaction so a concurrent reader sees a
//! chunk either entirely before or entirely after the change.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use memory_search_core::embedding::{blob_to_vec, vec_to_blob};
use memory_search_core::models::{
    Category, Chunk, ChunkRef, EmbeddingRecord, RankSource, RankedChunk, StoredChunk,
};
use memory_search_core::store::{Store, META_SCHEMA_VERSION};
use memory_search_core::tokenize::fts_match_expression;
use memory_search_core::{Error, Result};

use crate::db::db_error;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_category(raw: &str) -> Result<Category> {
    raw.parse()
        .map_err(|_| Error::Storage(format!("unknown category '{}' in index", raw)))
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let category: String = row.get("category");
    Ok(Chunk {
        id: row.get("id"),
        rel_path: row.get("path"),
        ordinal: row.get("ordinal"),
        line_start: row.get("line_start"),
        line_end: row.get("line_end"),
        category: parse_category(&category)?,
        title: row.get("title"),
        text: row.get("text"),
        hash: row.get("hash"),
    })
}

fn row_to_ref(row: &SqliteRow) -> ChunkRef {
    ChunkRef {
        id: row.get("id"),
        rel_path: row.get("path"),
        ordinal: row.get("ordinal"),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn stored_chunks(&self) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            "SELECT id, path, ordinal, line_start, line_end, category, title, hash
             FROM chunks ORDER BY path, ordinal",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter()
            .map(|row| {
                let category: String = row.get("category");
                Ok(StoredChunk {
                    id: row.get("id"),
                    rel_path: row.get("path"),
                    ordinal: row.get("ordinal"),
                    line_start: row.get("line_start"),
                    line_end: row.get("line_end"),
                    category: parse_category(&category)?,
                    title: row.get("title"),
                    hash: row.get("hash"),
                })
            })
            .collect()
    }

    async fn upsert_chunk(&self, chunk: &Chunk, terms: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, path, ordinal, line_start, line_end, category, title, text, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                ordinal = excluded.ordinal,
                line_start = excluded.line_start,
                line_end = excluded.line_end,
                category = excluded.category,
                title = excluded.title,
                text = excluded.text,
                hash = excluded.hash
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.rel_path)
        .bind(chunk.ordinal)
        .bind(chunk.line_start)
        .bind(chunk.line_end)
        .bind(chunk.category.as_str())
        .bind(&chunk.title)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, terms) VALUES (?, ?)")
            .bind(&chunk.id)
            .bind(terms)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn delete_chunk(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for sql in [
            "DELETE FROM embeddings WHERE chunk_id = ?",
            "DELETE FROM chunks_fts WHERE chunk_id = ?",
            "DELETE FROM chunks WHERE id = ?",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for sql in [
            "DELETE FROM embeddings",
            "DELETE FROM chunks_fts",
            "DELETE FROM chunks",
        ] {
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        sqlx::query("DELETE FROM index_meta WHERE key != ?")
            .bind(META_SCHEMA_VERSION)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, path, ordinal, line_start, line_end, category, title, text, hash
             FROM chunks WHERE id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(db_error)?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn keyword_search(
        &self,
        terms: &[String],
        limit: usize,
        category: Option<Category>,
    ) -> Result<Vec<RankedChunk>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let expression = fts_match_expression(terms);
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.path, c.ordinal, bm25(chunks_fts) AS score
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
              AND (? IS NULL OR c.category = ?)
            ORDER BY score, c.path, c.ordinal
            LIMIT ?
            "#,
        )
        .bind(&expression)
        .bind(category.map(|c| c.as_str()))
        .bind(category.map(|c| c.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .iter()
            .enumerate()
            .map(|(i, row)| RankedChunk {
                chunk: row_to_ref(row),
                source: RankSource::Keyword,
                rank: i + 1,
                raw_score: row.get("score"),
            })
            .collect())
    }

    async fn embedding_candidates(
        &self,
        model: &str,
        category: Option<Category>,
    ) -> Result<Vec<(ChunkRef, Vec<f32>)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.path, c.ordinal, e.vector
            FROM embeddings e
            JOIN chunks c ON c.id = e.chunk_id AND c.hash = e.hash
            WHERE e.model = ?
              AND (? IS NULL OR c.category = ?)
            "#,
        )
        .bind(model)
        .bind(category.map(|c| c.as_str()))
        .bind(category.map(|c| c.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                (row_to_ref(row), blob_to_vec(&blob))
            })
            .collect())
    }

    async fn pending_embeddings(&self, model: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.path, c.ordinal, c.line_start, c.line_end, c.category,
                   c.title, c.text, c.hash
            FROM chunks c
            LEFT JOIN embeddings e
                ON e.chunk_id = c.id AND e.model = ? AND e.hash = c.hash
            WHERE e.chunk_id IS NULL
            ORDER BY c.path, c.ordinal
            "#,
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn upsert_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, dims, hash, vector)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                hash = excluded.hash,
                vector = excluded.vector
            "#,
        )
        .bind(&record.chunk_id)
        .bind(&record.model)
        .bind(record.dims() as i64)
        .bind(&record.hash)
        .bind(vec_to_blob(&record.vector))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn purge_embeddings_except(&self, model: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM embeddings WHERE model != ?")
            .bind(model)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn meta(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO index_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_search_core::chunk::{chunk_document, ChunkingParams};
    use memory_search_core::tokenize::{index_text, query_terms};
    use tempfile::TempDir;

    async fn open_store(tmp: &TempDir) -> SqliteStore {
        let pool = crate::db::connect(&tmp.path().join("index.sqlite"))
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    async fn insert(store: &SqliteStore, rel_path: &str, text: &str) -> Vec<Chunk> {
        let chunks = chunk_document(
            rel_path,
            "Doc",
            Category::from_rel_path(rel_path),
            text,
            &ChunkingParams::default(),
        );
        for chunk in &chunks {
            store
                .upsert_chunk(chunk, &index_text(&chunk.text, 2))
                .await
                .unwrap();
        }
        chunks
    }

    #[tokio::test]
    async fn test_keyword_search_ranks_and_filters() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        insert(&store, "areas/tools/a.md", "websocket reconnect backoff").await;
        insert(&store, "daily/2026-01-01.md", "websocket websocket notes").await;

        let terms = query_terms("websocket", 2);
        let all = store.keyword_search(&terms, 10, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].rank, 1);
        assert_eq!(all[1].rank, 2);
        assert!(all[0].raw_score <= all[1].raw_score);

        let tools = store
            .keyword_search(&terms, 10, Some(Category::Tool))
            .await
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].chunk.rel_path, "areas/tools/a.md");
    }

    #[tokio::test]
    async fn test_cjk_terms_match_substrings() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        insert(&store, "MEMORY.md", "配置文件需要解密后才能读取").await;

        let terms = query_terms("解密", 2);
        let hits = store.keyword_search(&terms, 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_thai_marks_are_part_of_terms() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        insert(&store, "MEMORY.md", "กี").await;

        let same = store
            .keyword_search(&query_terms("กี", 2), 10, None)
            .await
            .unwrap();
        assert_eq!(same.len(), 1);

        let other_mark = store
            .keyword_search(&query_terms("ก่", 2), 10, None)
            .await
            .unwrap();
        assert!(other_mark.is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_fts_and_embedding() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let chunks = insert(&store, "MEMORY.md", "ephemeral content").await;
        let chunk = &chunks[0];
        store
            .upsert_embedding(&EmbeddingRecord {
                chunk_id: chunk.id.clone(),
                hash: chunk.hash.clone(),
                model: "hash-4".into(),
                vector: vec![1.0, 0.0, 0.0, 0.0],
            })
            .await
            .unwrap();
        assert_eq!(store.embedding_candidates("hash-4", None).await.unwrap().len(), 1);

        store.delete_chunk(&chunk.id).await.unwrap();
        let terms = query_terms("ephemeral", 2);
        assert!(store.keyword_search(&terms, 10, None).await.unwrap().is_empty());
        assert!(store.embedding_candidates("hash-4", None).await.unwrap().is_empty());
        assert!(store.stored_chunks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_embedding_is_pending() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let chunks = insert(&store, "MEMORY.md", "first version").await;
        store
            .upsert_embedding(&EmbeddingRecord {
                chunk_id: chunks[0].id.clone(),
                hash: "stale".into(),
                model: "hash-4".into(),
                vector: vec![0.5; 4],
            })
            .await
            .unwrap();

        assert!(store.embedding_candidates("hash-4", None).await.unwrap().is_empty());
        let pending = store.pending_embeddings("hash-4").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].text, "first version");
    }

    #[tokio::test]
    async fn test_clear_keeps_schema_version() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        insert(&store, "MEMORY.md", "something").await;
        store.set_meta("embedding_model", "hash-4").await.unwrap();

        store.clear().await.unwrap();
        assert!(store.stored_chunks().await.unwrap().is_empty());
        assert!(store.meta("embedding_model").await.unwrap().is_none());
        assert_eq!(
            store.meta(META_SCHEMA_VERSION).await.unwrap().as_deref(),
            Some(crate::migrate::SCHEMA_VERSION)
        );
    }

    #[tokio::test]
    async fn test_purge_other_models() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let chunks = insert(&store, "MEMORY.md", "alpha\n\n# B\n\nbeta").await;
        for (chunk, model) in chunks.iter().zip(["old", "new"]) {
            store
                .upsert_embedding(&EmbeddingRecord {
                    chunk_id: chunk.id.clone(),
                    hash: chunk.hash.clone(),
                    model: model.into(),
                    vector: vec![1.0, 2.0],
                })
                .await
                .unwrap();
        }
        assert_eq!(store.purge_embeddings_except("new").await.unwrap(), 1);
        assert_eq!(store.embedding_candidates("new", None).await.unwrap().len(), 1);
    }
}

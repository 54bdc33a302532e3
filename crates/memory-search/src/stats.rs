//! Index statistics.
//!
//! A quick summary of what's indexed: file and chunk counts, embedding
//! coverage, per-category breakdowns and a content digest. Two indexes with
//! the same digest hold the same chunks, full-text rows, vectors and
//! metadata.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

use memory_search_core::models::Category;
use memory_search_core::store::META_EMBEDDING_MODEL;
use memory_search_core::{Error, Result};

use crate::db::db_error;

#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub category: Category,
    pub files: i64,
    pub chunks: i64,
    pub embedded: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub index_path: PathBuf,
    pub size_bytes: u64,
    pub files: i64,
    pub chunks: i64,
    /// Vectors whose hash and model are current.
    pub embedded: i64,
    pub embedding_model: Option<String>,
    pub dims: Option<i64>,
    pub categories: Vec<CategoryStats>,
    pub digest: String,
}

pub async fn collect_stats(pool: &SqlitePool, index_path: &Path) -> Result<IndexStats> {
    let model: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
        .bind(META_EMBEDDING_MODEL)
        .fetch_optional(pool)
        .await
        .map_err(db_error)?;

    let dims: Option<i64> =
        sqlx::query_scalar("SELECT MAX(dims) FROM embeddings WHERE model = ?")
            .bind(model.as_deref().unwrap_or(""))
            .fetch_one(pool)
            .await
            .map_err(db_error)?;

    let rows = sqlx::query(
        r#"
        SELECT c.category,
               COUNT(DISTINCT c.path) AS files,
               COUNT(*) AS chunks,
               COUNT(e.chunk_id) AS embedded
        FROM chunks c
        LEFT JOIN embeddings e
            ON e.chunk_id = c.id AND e.hash = c.hash AND e.model = ?
        GROUP BY c.category
        ORDER BY c.category
        "#,
    )
    .bind(model.as_deref().unwrap_or(""))
    .fetch_all(pool)
    .await
    .map_err(db_error)?;

    let mut categories = Vec::with_capacity(rows.len());
    for row in &rows {
        let raw: String = row.get("category");
        let category = raw
            .parse()
            .map_err(|_| Error::Storage(format!("unknown category '{}' in index", raw)))?;
        categories.push(CategoryStats {
            category,
            files: row.get("files"),
            chunks: row.get("chunks"),
            embedded: row.get("embedded"),
        });
    }

    let files: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT path) FROM chunks")
        .fetch_one(pool)
        .await
        .map_err(db_error)?;

    let size_bytes = std::fs::metadata(index_path).map(|m| m.len()).unwrap_or(0);

    Ok(IndexStats {
        index_path: index_path.to_path_buf(),
        size_bytes,
        files,
        chunks: categories.iter().map(|c| c.chunks).sum(),
        embedded: categories.iter().map(|c| c.embedded).sum(),
        embedding_model: model,
        dims,
        categories,
        digest: content_digest(pool).await?,
    })
}

/// SHA-256 over every table, rows in a fixed order.
pub async fn content_digest(pool: &SqlitePool) -> Result<String> {
    let mut hasher = Sha256::new();

    let chunks = sqlx::query(
        "SELECT id, path, ordinal, line_start, line_end, category, title, text, hash
         FROM chunks ORDER BY path, ordinal",
    )
    .fetch_all(pool)
    .await
    .map_err(db_error)?;
    hasher.update(b"chunks\n");
    for row in &chunks {
        for col in ["id", "path", "category", "title", "text", "hash"] {
            feed(&mut hasher, row.get::<String, _>(col).as_bytes());
        }
        for col in ["ordinal", "line_start", "line_end"] {
            feed(&mut hasher, &row.get::<i64, _>(col).to_le_bytes());
        }
    }

    let fts = sqlx::query("SELECT chunk_id, terms FROM chunks_fts ORDER BY chunk_id")
        .fetch_all(pool)
        .await
        .map_err(db_error)?;
    hasher.update(b"chunks_fts\n");
    for row in &fts {
        feed(&mut hasher, row.get::<String, _>("chunk_id").as_bytes());
        feed(&mut hasher, row.get::<String, _>("terms").as_bytes());
    }

    let embeddings =
        sqlx::query("SELECT chunk_id, model, dims, hash, vector FROM embeddings ORDER BY chunk_id")
            .fetch_all(pool)
            .await
            .map_err(db_error)?;
    hasher.update(b"embeddings\n");
    for row in &embeddings {
        for col in ["chunk_id", "model", "hash"] {
            feed(&mut hasher, row.get::<String, _>(col).as_bytes());
        }
        feed(&mut hasher, &row.get::<i64, _>("dims").to_le_bytes());
        feed(&mut hasher, &row.get::<Vec<u8>, _>("vector"));
    }

    let meta = sqlx::query("SELECT key, value FROM index_meta ORDER BY key")
        .fetch_all(pool)
        .await
        .map_err(db_error)?;
    hasher.update(b"index_meta\n");
    for row in &meta {
        feed(&mut hasher, row.get::<String, _>("key").as_bytes());
        feed(&mut hasher, row.get::<String, _>("value").as_bytes());
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Length-prefixed so adjacent fields cannot run together.
fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

pub fn print_stats(stats: &IndexStats) {
    println!("Memory Search: Index Stats");
    println!("==========================");
    println!();
    println!("  Index:       {}", stats.index_path.display());
    println!("  Size:        {}", format_bytes(stats.size_bytes));
    println!();
    println!("  Files:       {}", stats.files);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.embedded * 100) / stats.chunks
        } else {
            0
        }
    );
    match (&stats.embedding_model, stats.dims) {
        (Some(model), Some(dims)) => println!("  Model:       {} ({} dims)", model, dims),
        (Some(model), None) => println!("  Model:       {}", model),
        _ => println!("  Model:       none"),
    }
    println!("  Digest:      {}", stats.digest);

    if !stats.categories.is_empty() {
        println!();
        println!("  By category:");
        println!(
            "  {:<18} {:>6} {:>8} {:>10}",
            "CATEGORY", "FILES", "CHUNKS", "EMBEDDED"
        );
        println!("  {}", "-".repeat(46));
        for c in &stats.categories {
            println!(
                "  {:<18} {:>6} {:>8} {:>10}",
                c.category.as_str(),
                c.files,
                c.chunks,
                c.embedded
            );
        }
    }

    println!();
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[tokio::test]
    async fn test_empty_index_stats() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        let pool = crate::db::connect(&path).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let stats = collect_stats(&pool, &path).await.unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.chunks, 0);
        assert!(stats.embedding_model.is_none());
        assert!(stats.dims.is_none());
        assert!(stats.categories.is_empty());
        assert_eq!(stats.digest.len(), 64);
        assert_eq!(stats.digest, content_digest(&pool).await.unwrap());
    }
}

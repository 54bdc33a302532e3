use sqlx::SqlitePool;

use memory_search_core::store::META_SCHEMA_VERSION;
use memory_search_core::{Error, Result};

use crate::db::db_error;

/// Bumped whenever the table layout changes. An index written with another
/// version is treated as corrupt and must be rebuilt.
pub const SCHEMA_VERSION: &str = "2";

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            line_start INTEGER NOT NULL,
            line_end INTEGER NOT NULL,
            category TEXT NOT NULL,
            title TEXT NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(path, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_error)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            chunk_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            hash TEXT NOT NULL,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_error)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_error)?;

    // FTS5 CREATE is not idempotent natively, so we check first.
    // Combining marks count as token characters so Thai and Indic n-grams
    // keep their vowel and tone signs.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await
    .map_err(db_error)?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                terms,
                tokenize = "unicode61 categories 'L* N* Co Mn Mc'"
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(db_error)?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_category ON chunks(category)")
        .execute(pool)
        .await
        .map_err(db_error)?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(model)")
        .execute(pool)
        .await
        .map_err(db_error)?;

    let version: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(META_SCHEMA_VERSION)
            .fetch_optional(pool)
            .await
            .map_err(db_error)?;

    match version.as_deref() {
        None => {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                .bind(META_SCHEMA_VERSION)
                .bind(SCHEMA_VERSION)
                .execute(pool)
                .await
                .map_err(db_error)?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(other) => {
            return Err(Error::CorruptIndex(format!(
                "index schema version {} does not match expected {}",
                other, SCHEMA_VERSION
            )))
        }
    }

    Ok(())
}

//! SQLite connection handling and error classification.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use memory_search_core::{Error, Result};

const SQLITE_CORRUPT: i64 = 11;
const SQLITE_NOTADB: i64 = 26;

pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(db_error)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(db_error)
}

/// Classify a sqlx error. Corruption and "not a database" become
/// [`Error::CorruptIndex`]; everything else is [`Error::Storage`].
pub fn db_error(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        let primary = db
            .code()
            .and_then(|c| c.parse::<i64>().ok())
            .map(|c| c & 0xff);
        if matches!(primary, Some(SQLITE_CORRUPT) | Some(SQLITE_NOTADB)) {
            return Error::CorruptIndex(db.message().to_string());
        }
    }
    Error::Storage(err.to_string())
}

/// Remove the database file and its WAL and shared-memory companions.
pub fn remove_index_files(db_path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = db_path.as_os_str().to_owned();
        name.push(suffix);
        match std::fs::remove_file(&name) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

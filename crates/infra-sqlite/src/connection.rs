// SQLite pool setup
//
// WAL plus a busy timeout keeps the scheduler loop and the RPC surface from
// tripping over each other's writes. The parent directory is created on
// first run so a fresh install can open its default path.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use streamgate_core::error::{AppError, Result};

pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    if path != ":memory:" {
        if let Some(dir) = Path::new(path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(e.to_string()))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

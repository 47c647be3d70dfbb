//! Queue database handle: connection, schema, timestamps. Item queries live
//! in `items`.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_CONNECTIONS: u32 = 8;

/// `omega add` may write while `omega run` holds the database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// `$XDG_STATE_HOME/omega/queue.db`.
pub fn default_db_path() -> Result<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix("omega")?;
    Ok(dirs.get_state_home().join("queue.db"))
}

/// Handle to the SQLite-backed download queue. Cheap to clone.
#[derive(Clone)]
pub struct QueueDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl QueueDb {
    pub async fn open_default() -> Result<Self> {
        Self::open_at(default_db_path()?).await
    }

    /// Open (or create) the database file at `path`, creating parent
    /// directories, and bring the schema up to date.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("open queue database {}", path.display()))?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: Pool<Sqlite>) -> Result<Self> {
        let db = QueueDb { pool };
        db.migrate().await.context("migrate queue database")?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        // Flags are stored as 0/1 integers. `message_log` / `error_log` hold the
        // newline-joined transcripts of the task that finished the item.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                code TEXT NOT NULL CHECK (length(code) > 0),
                priority INTEGER NOT NULL DEFAULT 100,
                queued_at INTEGER NOT NULL,
                downloading INTEGER NOT NULL DEFAULT 0,
                retrying INTEGER NOT NULL DEFAULT 0,
                completed INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                completed_at INTEGER,
                message_log TEXT,
                error_log TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS queue_items_pending
            ON queue_items (completed, failed, downloading, retrying, priority, queued_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for DB timestamps).
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// In-memory database for tests. One connection, since every new
/// `:memory:` connection is a separate empty database.
#[cfg(test)]
pub(crate) async fn open_memory() -> Result<QueueDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    QueueDb::with_pool(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_at_creates_file_in_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my state/#1/queue.db");

        let db = QueueDb::open_at(&path).await.unwrap();
        assert!(path.exists());
        db.pool.close().await;

        // Reopening runs the idempotent migration again.
        QueueDb::open_at(&path).await.unwrap();
    }
}

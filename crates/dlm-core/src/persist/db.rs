//! Database handle: open, migrate, write serialization.

use crate::error::DownloadError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;

/// Handle to the SQLite-backed download database.
///
/// The default database file lives under the XDG state directory:
/// `~/.local/state/dlm/downloads.db`. Cloning is cheap; all clones share the
/// pool and the writer lock.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: Pool<Sqlite>,
    /// All writes serialize through this lock; readers use the pool directly.
    pub(crate) write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Database {
    /// Open (or create) the default database and run migrations.
    pub async fn open_default() -> Result<Self, DownloadError> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("dlm")
            .map_err(|e| DownloadError::Persistence(e.to_string()))?;
        let state_dir = xdg_dirs.get_state_home();
        tokio::fs::create_dir_all(&state_dir).await?;
        Self::open_at(&state_dir.join("downloads.db")).await
    }

    /// Open (or create) a database at an explicit path.
    pub async fn open_at(path: &Path) -> Result<Self, DownloadError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let db = Self::from_pool(pool);
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database for tests (single connection, no disk I/O).
    pub async fn open_memory() -> Result<Self, DownloadError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self::from_pool(pool);
        db.migrate().await?;
        Ok(db)
    }

    fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    async fn migrate(&self) -> Result<(), DownloadError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                filename TEXT NOT NULL,
                destination TEXT,
                file_size INTEGER NOT NULL DEFAULT 0,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                created_at REAL NOT NULL,
                started_at REAL,
                completed_at REAL,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                supports_range INTEGER NOT NULL DEFAULT 0,
                num_workers INTEGER NOT NULL DEFAULT 1,
                download_speed REAL NOT NULL DEFAULT 0,
                eta REAL NOT NULL DEFAULT 0,
                progress_percent REAL NOT NULL DEFAULT 0,
                content_type TEXT,
                headers_json TEXT,
                checksum TEXT,
                scheduled_time REAL,
                priority INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS download_parts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                download_id TEXT NOT NULL REFERENCES downloads(id) ON DELETE CASCADE,
                part_number INTEGER NOT NULL,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                temp_path TEXT,
                UNIQUE(download_id, part_number)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_status ON downloads (status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_created_at ON downloads (created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_download_parts_download_id ON download_parts (download_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

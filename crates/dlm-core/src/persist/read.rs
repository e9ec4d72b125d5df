//! Read-side operations: loading tasks, status listings, statistics.

use super::Database;
use crate::error::DownloadError;
use crate::task::{DownloadPart, DownloadStatus, DownloadTask};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use std::path::PathBuf;

/// Aggregate view over the downloads table.
#[derive(Debug, Clone, Default)]
pub struct DownloadStats {
    pub total: u64,
    pub by_status: HashMap<DownloadStatus, u64>,
    /// Bytes accumulated across all tasks, completed or not.
    pub total_bytes_downloaded: u64,
}

impl DownloadStats {
    pub fn count(&self, status: DownloadStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

impl Database {
    /// Fetch a single task with its parts, ordered by part number.
    pub async fn load_task(&self, id: &str) -> Result<Option<DownloadTask>, DownloadError> {
        let row = sqlx::query("SELECT * FROM downloads WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut task = task_from_row(&row)?;
        task.parts = self.load_parts(id).await?;
        Ok(Some(task))
    }

    /// All tasks, newest first.
    pub async fn load_all(&self) -> Result<Vec<DownloadTask>, DownloadError> {
        let rows = sqlx::query("SELECT * FROM downloads ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task = task_from_row(&row)?;
            task.parts = self.load_parts(&task.id).await?;
            out.push(task);
        }
        Ok(out)
    }

    /// Tasks in a given status, newest first.
    pub async fn list_by_status(
        &self,
        status: DownloadStatus,
    ) -> Result<Vec<DownloadTask>, DownloadError> {
        let rows = sqlx::query(
            "SELECT * FROM downloads WHERE status = ?1 ORDER BY created_at DESC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task = task_from_row(&row)?;
            task.parts = self.load_parts(&task.id).await?;
            out.push(task);
        }
        Ok(out)
    }

    /// Counts per status plus total bytes downloaded.
    pub async fn stats(&self) -> Result<DownloadStats, DownloadError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n, SUM(downloaded_bytes) AS bytes FROM downloads GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = DownloadStats::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            let bytes: Option<i64> = row.get("bytes");
            stats.total += n as u64;
            stats
                .by_status
                .insert(DownloadStatus::from_str(&status), n as u64);
            stats.total_bytes_downloaded += bytes.unwrap_or(0).max(0) as u64;
        }
        Ok(stats)
    }

    async fn load_parts(&self, download_id: &str) -> Result<Vec<DownloadPart>, DownloadError> {
        let rows = sqlx::query(
            r#"
            SELECT part_number, start_byte, end_byte, downloaded_bytes, status, temp_path
            FROM download_parts
            WHERE download_id = ?1
            ORDER BY part_number ASC
            "#,
        )
        .bind(download_id)
        .fetch_all(&self.pool)
        .await?;

        let mut parts = Vec::with_capacity(rows.len());
        for row in rows {
            let part_number: i64 = row.get("part_number");
            let start_byte: i64 = row.get("start_byte");
            let end_byte: i64 = row.get("end_byte");
            let downloaded_bytes: i64 = row.get("downloaded_bytes");
            let status: String = row.get("status");
            let temp_path: Option<String> = row.get("temp_path");
            parts.push(DownloadPart {
                part_number: part_number as u32,
                start_byte: start_byte as u64,
                end_byte: end_byte as u64,
                downloaded_bytes: downloaded_bytes.max(0) as u64,
                status: DownloadStatus::from_str(&status),
                temp_path: temp_path.map(PathBuf::from),
            });
        }
        Ok(parts)
    }
}

fn task_from_row(row: &SqliteRow) -> Result<DownloadTask, DownloadError> {
    let headers_json: Option<String> = row.get("headers_json");
    let response_headers: HashMap<String, String> = headers_json
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| DownloadError::Persistence(e.to_string()))?
        .unwrap_or_default();

    let status: String = row.get("status");
    let destination: Option<String> = row.get("destination");
    let file_size: i64 = row.get("file_size");
    let downloaded_bytes: i64 = row.get("downloaded_bytes");
    let retry_count: i64 = row.get("retry_count");
    let max_retries: i64 = row.get("max_retries");
    let supports_range: i64 = row.get("supports_range");
    let num_workers: i64 = row.get("num_workers");
    let priority: i64 = row.get("priority");

    Ok(DownloadTask {
        id: row.get("id"),
        url: row.get("url"),
        created_at: row.get("created_at"),
        filename: row.get("filename"),
        destination: destination.map(PathBuf::from),
        file_size: file_size.max(0) as u64,
        downloaded_bytes: downloaded_bytes.max(0) as u64,
        status: DownloadStatus::from_str(&status),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error_message: row.get("error_message"),
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        supports_range: supports_range != 0,
        num_workers: num_workers.max(1) as usize,
        parts: Vec::new(),
        download_speed: row.get("download_speed"),
        eta_seconds: row.get("eta"),
        progress_percent: row.get("progress_percent"),
        content_type: row.get("content_type"),
        response_headers,
        checksum: row.get("checksum"),
        scheduled_time: row.get("scheduled_time"),
        priority: priority as i32,
    })
}

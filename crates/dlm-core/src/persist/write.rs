//! Write-side operations. Every method takes the writer lock.

use super::Database;
use crate::error::DownloadError;
use crate::task::{unix_now, DownloadStatus, DownloadTask, TaskId};

impl Database {
    /// Insert or update a task and replace its parts, in one transaction.
    /// Called on every status transition; the task row is the source of
    /// truth for everything except in-flight part byte counts.
    pub async fn upsert_task(&self, task: &DownloadTask) -> Result<(), DownloadError> {
        let _guard = self.write_lock.lock().await;
        let headers_json = serde_json::to_string(&task.response_headers)
            .map_err(|e| DownloadError::Persistence(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO downloads (
                id, url, filename, destination, file_size, downloaded_bytes,
                status, created_at, started_at, completed_at, error_message,
                retry_count, max_retries, supports_range, num_workers,
                download_speed, eta, progress_percent, content_type,
                headers_json, checksum, scheduled_time, priority
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                      ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                filename = excluded.filename,
                destination = excluded.destination,
                file_size = excluded.file_size,
                downloaded_bytes = excluded.downloaded_bytes,
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                error_message = excluded.error_message,
                retry_count = excluded.retry_count,
                max_retries = excluded.max_retries,
                supports_range = excluded.supports_range,
                num_workers = excluded.num_workers,
                download_speed = excluded.download_speed,
                eta = excluded.eta,
                progress_percent = excluded.progress_percent,
                content_type = excluded.content_type,
                headers_json = excluded.headers_json,
                checksum = excluded.checksum,
                scheduled_time = excluded.scheduled_time,
                priority = excluded.priority
            "#,
        )
        .bind(&task.id)
        .bind(&task.url)
        .bind(&task.filename)
        .bind(task.destination.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(task.file_size as i64)
        .bind(task.downloaded_bytes as i64)
        .bind(task.status.as_str())
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(&task.error_message)
        .bind(task.retry_count as i64)
        .bind(task.max_retries as i64)
        .bind(task.supports_range as i64)
        .bind(task.num_workers as i64)
        .bind(task.download_speed)
        .bind(task.eta_seconds)
        .bind(task.progress_percent)
        .bind(&task.content_type)
        .bind(headers_json)
        .bind(&task.checksum)
        .bind(task.scheduled_time)
        .bind(task.priority as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM download_parts WHERE download_id = ?1")
            .bind(&task.id)
            .execute(&mut *tx)
            .await?;

        for part in &task.parts {
            sqlx::query(
                r#"
                INSERT INTO download_parts (
                    download_id, part_number, start_byte, end_byte,
                    downloaded_bytes, status, temp_path
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&task.id)
            .bind(part.part_number as i64)
            .bind(part.start_byte as i64)
            .bind(part.end_byte as i64)
            .bind(part.downloaded_bytes as i64)
            .bind(part.status.as_str())
            .bind(part.temp_path.as_ref().map(|p| p.to_string_lossy().into_owned()))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Flush the in-flight progress counters for a task. Cheap single-row
    /// update; part counters are reconciled from temp-file sizes on reload.
    pub async fn update_progress(
        &self,
        id: &str,
        downloaded_bytes: u64,
        progress_percent: f64,
        download_speed: f64,
        eta_seconds: f64,
    ) -> Result<(), DownloadError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            UPDATE downloads
            SET downloaded_bytes = ?1,
                progress_percent = ?2,
                download_speed = ?3,
                eta = ?4
            WHERE id = ?5
            "#,
        )
        .bind(downloaded_bytes as i64)
        .bind(progress_percent)
        .bind(download_speed)
        .bind(eta_seconds)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a task and its parts.
    pub async fn delete_task(&self, id: &str) -> Result<(), DownloadError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM download_parts WHERE download_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM downloads WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Rewrite any task left in `downloading` to `paused` (the previous
    /// process died mid-transfer). Call before scheduling on boot.
    /// Returns the number of tasks reset.
    pub async fn recover_interrupted(&self) -> Result<u64, DownloadError> {
        let _guard = self.write_lock.lock().await;
        let r = sqlx::query("UPDATE downloads SET status = ?1 WHERE status = ?2")
            .bind(DownloadStatus::Paused.as_str())
            .bind(DownloadStatus::Downloading.as_str())
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Delete completed tasks older than `older_than_days`. Returns the
    /// number removed.
    pub async fn gc_completed(&self, older_than_days: u64) -> Result<u64, DownloadError> {
        let _guard = self.write_lock.lock().await;
        let cutoff = unix_now() - older_than_days as f64 * 86_400.0;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM download_parts WHERE download_id IN (
                SELECT id FROM downloads
                WHERE status = ?1 AND completed_at IS NOT NULL AND completed_at < ?2
            )
            "#,
        )
        .bind(DownloadStatus::Completed.as_str())
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        let r = sqlx::query(
            r#"
            DELETE FROM downloads
            WHERE status = ?1 AND completed_at IS NOT NULL AND completed_at < ?2
            "#,
        )
        .bind(DownloadStatus::Completed.as_str())
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(r.rows_affected())
    }

    /// Update only the status column (used by tests and maintenance paths;
    /// the manager normally upserts the whole snapshot).
    pub async fn set_status(&self, id: &TaskId, status: DownloadStatus) -> Result<(), DownloadError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("UPDATE downloads SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

//! Event pump: applies engine events to the registry, persists them, and
//! fans them out to subscribers.

use super::{processor, Shared};
use crate::engine::EngineEvent;
use crate::task::{DownloadStatus, DownloadTask};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// In-flight progress reaches the database at most this often per task.
/// Status transitions always flush immediately.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

pub(super) async fn run(
    shared: Arc<Shared>,
    mut rx: tokio::sync::mpsc::Receiver<EngineEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Progress(snapshot) => on_progress(&shared, snapshot).await,
            EngineEvent::Status(snapshot) => on_status(&shared, snapshot).await,
            EngineEvent::RetryableFailure { task, error } => {
                on_retryable_failure(&shared, task, error).await
            }
        }
    }
}

async fn on_progress(shared: &Arc<Shared>, snapshot: DownloadTask) {
    let known = {
        let mut registry = shared.registry.write().unwrap();
        match registry.get_mut(&snapshot.id) {
            Some(task) => {
                // Copy the transfer deltas; queue-side fields stay ours.
                task.downloaded_bytes = snapshot.downloaded_bytes;
                task.progress_percent = snapshot.progress_percent;
                task.download_speed = snapshot.download_speed;
                task.eta_seconds = snapshot.eta_seconds;
                task.parts = snapshot.parts.clone();
                true
            }
            None => false,
        }
    };
    if !known {
        return; // deleted while transferring; the cancel path cleans up
    }

    let should_flush = {
        let mut last_flush = shared.last_flush.lock().unwrap();
        match last_flush.get(&snapshot.id) {
            Some(at) if at.elapsed() < FLUSH_INTERVAL => false,
            _ => {
                last_flush.insert(snapshot.id.clone(), Instant::now());
                true
            }
        }
    };
    if should_flush {
        if let Err(e) = shared
            .db
            .update_progress(
                &snapshot.id,
                snapshot.downloaded_bytes,
                snapshot.progress_percent,
                snapshot.download_speed,
                snapshot.eta_seconds,
            )
            .await
        {
            tracing::warn!(task_id = %snapshot.id, "progress flush failed: {}", e);
        }
    }

    shared.events.emit_progress(&snapshot);
}

async fn on_status(shared: &Arc<Shared>, snapshot: DownloadTask) {
    {
        let mut registry = shared.registry.write().unwrap();
        if let Some(existing) = registry.get_mut(&snapshot.id) {
            *existing = snapshot.clone();
        } else {
            return; // deleted concurrently
        }
    }

    if snapshot.status != DownloadStatus::Downloading {
        shared.active.lock().unwrap().remove(&snapshot.id);
        shared.last_flush.lock().unwrap().remove(&snapshot.id);
    }

    if let Err(e) = shared.db.upsert_task(&snapshot).await {
        tracing::warn!(task_id = %snapshot.id, "status persist failed: {}", e);
    }
    shared.events.emit_status(&snapshot);
}

/// A worker failed but budget remains: the whole task re-enters Pending and
/// is re-queued after the retry delay. Completed parts resume from their
/// temp files, so nothing already downloaded is fetched twice.
async fn on_retryable_failure(shared: &Arc<Shared>, failed: DownloadTask, error: String) {
    tracing::warn!(task_id = %failed.id, "transfer failed, retrying: {}", error);
    shared.active.lock().unwrap().remove(&failed.id);
    shared.last_flush.lock().unwrap().remove(&failed.id);

    let snapshot = shared.update_task(&failed.id, |task| {
        task.parts = failed.parts.clone();
        task.downloaded_bytes = failed.downloaded_bytes;
        task.begin_retry();
    });
    let Some(task) = snapshot else { return };

    if let Err(e) = shared.db.upsert_task(&task).await {
        tracing::warn!(task_id = %task.id, "persist failed: {}", e);
    }
    shared.events.emit_status(&task);
    processor::requeue_after_delay(shared, &task.id);
}

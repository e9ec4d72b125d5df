//! Queue processor: feeds the engine while the concurrency cap allows.

use super::Shared;
use crate::error::DownloadError;
use crate::task::{DownloadStatus, TaskId};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub(super) async fn run(shared: Arc<Shared>) {
    while shared.running.load(Ordering::SeqCst) {
        let at_capacity = {
            let active = shared.active.lock().unwrap();
            active.len() >= shared.settings.max_concurrent_downloads
        };
        if at_capacity {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        let Some(id) = shared.queue.pop_wait(POLL_INTERVAL).await else {
            continue;
        };

        // A task cancelled (or completed) while it sat in the queue is
        // skipped without comment.
        let task = shared.registry.read().unwrap().get(&id).cloned();
        let Some(task) = task else { continue };
        if task.status != DownloadStatus::Queued {
            continue;
        }

        shared.active.lock().unwrap().insert(id.clone());

        let engine = Arc::clone(&shared.engine);
        let start_task = task.clone();
        let result = tokio::task::spawn_blocking(move || engine.start(start_task)).await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                shared.active.lock().unwrap().remove(&id);
                handle_start_failure(&shared, &id, e).await;
            }
            Err(join_err) => {
                shared.active.lock().unwrap().remove(&id);
                tracing::error!(task_id = %id, "engine start task panicked: {}", join_err);
            }
        }
    }
}

/// Setup-phase failure (unreachable, probe error, no space). Transient
/// failures consume a retry and re-enter the queue after the retry delay;
/// everything else is terminal.
async fn handle_start_failure(shared: &Arc<Shared>, id: &TaskId, error: DownloadError) {
    let can_retry = shared
        .registry
        .read()
        .unwrap()
        .get(id)
        .map(|t| t.can_retry())
        .unwrap_or(false);

    if error.is_retryable() && can_retry {
        tracing::warn!(task_id = %id, "start failed, will retry: {}", error);
        let snapshot = shared.update_task(id, |t| t.begin_retry());
        if let Some(task) = snapshot {
            if let Err(e) = shared.db.upsert_task(&task).await {
                tracing::warn!(task_id = %id, "persist failed: {}", e);
            }
            shared.events.emit_status(&task);
        }
        requeue_after_delay(shared, id);
    } else {
        tracing::error!(task_id = %id, "download failed: {}", error);
        let message = error.to_string();
        let snapshot = shared.update_task(id, |t| t.mark_errored(&message));
        if let Some(task) = snapshot {
            if let Err(e) = shared.db.upsert_task(&task).await {
                tracing::warn!(task_id = %id, "persist failed: {}", e);
            }
            shared.events.emit_status(&task);
        }
    }
}

/// Re-enqueue a Pending task once the configured retry delay has passed.
pub(super) fn requeue_after_delay(shared: &Arc<Shared>, id: &TaskId) {
    let shared = Arc::clone(shared);
    let id = id.clone();
    let delay = Duration::from_secs(shared.settings.retry_delay);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let still_pending = shared
            .registry
            .read()
            .unwrap()
            .get(&id)
            .map(|t| t.status == DownloadStatus::Pending)
            .unwrap_or(false);
        if still_pending {
            if let Err(e) = shared.enqueue(&id).await {
                tracing::warn!(task_id = %id, "retry enqueue failed: {}", e);
            }
        }
    });
}

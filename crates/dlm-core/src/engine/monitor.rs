//! Per-task supervisor: waits for worker results, then merges, verifies,
//! and reports the outcome.

use super::progress::ProgressState;
use super::{ActiveTransfer, EngineEvent};
use crate::checksum::ChecksumAlgorithm;
use crate::error::DownloadError;
use crate::file_store::FileStore;
use crate::task::TaskId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

pub(super) struct MonitorCtx {
    pub task_id: TaskId,
    pub store: Arc<FileStore>,
    pub abort: Arc<AtomicBool>,
    pub progress: Arc<Mutex<ProgressState>>,
    pub events: tokio::sync::mpsc::Sender<EngineEvent>,
    pub results: mpsc::Receiver<(u32, Result<(), DownloadError>)>,
    pub active: Arc<Mutex<HashMap<TaskId, ActiveTransfer>>>,
    pub expected: usize,
}

pub(super) fn run(ctx: MonitorCtx) {
    let mut failures: Vec<(u32, DownloadError)> = Vec::new();
    let mut received = 0usize;

    while received < ctx.expected {
        if ctx.abort.load(Ordering::Relaxed) {
            // Pause or cancel: exit silently, the manager owns the follow-up.
            deregister(&ctx);
            return;
        }
        match ctx.results.recv_timeout(Duration::from_millis(250)) {
            Ok((_, Ok(()))) => received += 1,
            Ok((_, Err(DownloadError::Cancelled))) => received += 1,
            Ok((part, Err(e))) => {
                received += 1;
                failures.push((part, e));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if ctx.abort.load(Ordering::Relaxed) {
        deregister(&ctx);
        return;
    }

    if failures.is_empty() {
        finish_success(&ctx);
    } else {
        finish_failure(&ctx, failures);
    }
    deregister(&ctx);
}

fn finish_success(ctx: &MonitorCtx) {
    let mut task = ctx.progress.lock().unwrap().snapshot();
    let part_paths: Vec<PathBuf> = task
        .parts
        .iter()
        .filter_map(|p| p.temp_path.clone())
        .collect();

    let dir = task
        .destination
        .clone()
        .unwrap_or_else(|| ctx.store.category_dir(&task.filename));

    let final_path = match ctx.store.merge(&part_paths, &dir, &task.filename) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(task_id = %task.id, "merge failed: {}", e);
            // Temp files stay on disk so a retry can resume.
            task.mark_errored("Failed to merge temporary files");
            let _ = ctx.events.blocking_send(EngineEvent::Status(task));
            return;
        }
    };

    // The merge may have renamed around a collision; record reality.
    if let Some(name) = final_path.file_name() {
        task.filename = name.to_string_lossy().into_owned();
    }
    if let Some(parent) = final_path.parent() {
        task.destination = Some(parent.to_path_buf());
    }

    // Unknown-size transfers learn their size from the merged file.
    if task.file_size == 0 {
        task.file_size = ctx.store.part_size(&final_path);
    }

    match ctx.store.verify(
        &final_path,
        task.file_size,
        task.checksum.as_deref(),
        ChecksumAlgorithm::default(),
    ) {
        Ok(()) => {
            ctx.store.cleanup(&part_paths);
            task.mark_completed();
            tracing::info!(task_id = %task.id, path = %final_path.display(), "download completed");
            let _ = ctx.events.blocking_send(EngineEvent::Status(task));
        }
        Err(e) => {
            tracing::error!(task_id = %task.id, "verification failed: {}", e);
            task.mark_errored("File integrity verification failed");
            let _ = ctx.events.blocking_send(EngineEvent::Status(task));
        }
    }
}

fn finish_failure(ctx: &MonitorCtx, failures: Vec<(u32, DownloadError)>) {
    let mut task = ctx.progress.lock().unwrap().snapshot();
    let (part, error) = &failures[0];
    let message = format!("part {} failed: {}", part, error);

    let fatal = !error.is_retryable();
    if fatal || !task.can_retry() {
        // Terminal failure: the task goes to Error and its part files go.
        let part_paths = ctx.progress.lock().unwrap().temp_paths();
        ctx.store.cleanup(&part_paths);
        task.mark_errored(&message);
        let _ = ctx.events.blocking_send(EngineEvent::Status(task));
    } else {
        let _ = ctx.events.blocking_send(EngineEvent::RetryableFailure {
            task,
            error: message,
        });
    }
}

fn deregister(ctx: &MonitorCtx) {
    ctx.active.lock().unwrap().remove(&ctx.task_id);
}

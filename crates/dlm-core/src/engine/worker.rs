//! One worker downloads one part.

use super::progress::ProgressState;
use super::EngineEvent;
use crate::error::DownloadError;
use crate::file_store::FileStore;
use crate::http_client::HttpClient;
use crate::task::DownloadStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

/// Context shared by every worker of one task.
pub(super) struct WorkerCtx {
    pub url: String,
    pub supports_range: bool,
    /// 0 means the total size is unknown (single open-ended part).
    pub file_size: u64,
    pub multi_part: bool,
    pub http: Arc<HttpClient>,
    pub store: Arc<FileStore>,
    pub abort: Arc<AtomicBool>,
    pub progress: Arc<Mutex<ProgressState>>,
    pub events: tokio::sync::mpsc::Sender<EngineEvent>,
    pub results: mpsc::Sender<(u32, Result<(), DownloadError>)>,
}

pub(super) fn run(ctx: Arc<WorkerCtx>, part_number: u32) {
    let result = download_part(&ctx, part_number);
    {
        let mut progress = ctx.progress.lock().unwrap();
        match &result {
            Ok(()) => progress.set_part_status(part_number, DownloadStatus::Completed),
            // A cancelled worker leaves the part exactly as it was.
            Err(DownloadError::Cancelled) => {}
            Err(e) => {
                tracing::warn!(part = part_number, "part failed: {}", e);
                progress.set_part_status(part_number, DownloadStatus::Error);
            }
        }
    }
    let _ = ctx.results.send((part_number, result));
}

fn download_part(ctx: &WorkerCtx, part_number: u32) -> Result<(), DownloadError> {
    if ctx.abort.load(Ordering::Relaxed) {
        return Err(DownloadError::Cancelled);
    }

    let (start, end, downloaded, temp_path) = {
        let mut progress = ctx.progress.lock().unwrap();
        progress.set_part_status(part_number, DownloadStatus::Downloading);
        progress.part_info(part_number)
    };
    let temp_path = temp_path.ok_or_else(|| {
        DownloadError::Disk(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "part has no temp file",
        ))
    })?;

    let open_ended = ctx.file_size == 0;
    let effective_start = start + downloaded;
    if !open_ended && effective_start > end {
        // Everything in range already on disk from an earlier run.
        return Ok(());
    }

    let mut part_file = ctx.store.open_part(&temp_path)?;

    // A Range request is used whenever the server supports ranges and either
    // the task has several parts or this part resumes mid-range. Without
    // range support a resume restarts the stream, so stale bytes must go.
    let use_range = !open_ended && ctx.supports_range && (ctx.multi_part || downloaded > 0);
    if !use_range && downloaded > 0 {
        part_file.truncate()?;
        ctx.progress.lock().unwrap().reset_part(part_number);
    }

    let mut on_bytes = move |data: &[u8]| -> Result<(), DownloadError> {
        part_file.append(data)?;
        let snapshot = ctx
            .progress
            .lock()
            .unwrap()
            .record_chunk(part_number, data.len() as u64);
        if let Some(snapshot) = snapshot {
            let _ = ctx.events.blocking_send(EngineEvent::Progress(snapshot));
        }
        Ok(())
    };

    let result = if use_range {
        let covers_whole = effective_start == 0 && end == ctx.file_size - 1;
        ctx.http
            .fetch_range(&ctx.url, effective_start, end, covers_whole, &ctx.abort, &mut on_bytes)
    } else {
        ctx.http.fetch_full(&ctx.url, &ctx.abort, &mut on_bytes)
    };

    match result {
        // 416 means the server considers the range fully delivered.
        Err(DownloadError::RangeAlreadySatisfied) => Ok(()),
        other => other,
    }
}

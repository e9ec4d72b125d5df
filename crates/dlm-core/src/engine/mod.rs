//! Download engine: multi-part worker fan-out with pause/resume/cancel.
//!
//! `start` runs the synchronous setup pipeline (validate, probe, space
//! check, part planning, temp files), transitions the task to Downloading,
//! then spawns one worker thread per part plus a monitor thread and returns.
//! Workers stream ranged GETs into fsynced part files; the monitor merges
//! and verifies on completion. Outcomes flow to the manager as
//! `EngineEvent`s over a tokio channel.

mod monitor;
mod progress;
mod setup;
mod worker;

use crate::config::Settings;
use crate::error::DownloadError;
use crate::file_store::FileStore;
use crate::http_client::HttpClient;
use crate::task::{plan_parts, DownloadPart, DownloadStatus, DownloadTask, TaskId};
use progress::ProgressState;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

/// How long pause/cancel waits for workers before abandoning them. A worker
/// past the deadline still holds only its own part file, which resume
/// reconciles from size.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Events the engine reports to the manager's async pump.
#[derive(Debug)]
pub enum EngineEvent {
    /// Coalesced progress snapshot (at most one per task per 250 ms).
    Progress(DownloadTask),
    /// A status transition the engine performed itself
    /// (Downloading, Completed, Error).
    Status(DownloadTask),
    /// A worker failed but the retry budget is not exhausted; the manager
    /// decides when the task re-enters the queue. Temp files are retained.
    RetryableFailure { task: DownloadTask, error: String },
}

/// Live state of one task being transferred.
struct ActiveTransfer {
    abort: Arc<AtomicBool>,
    workers: Vec<std::thread::JoinHandle<()>>,
    monitor: Option<std::thread::JoinHandle<()>>,
    progress: Arc<Mutex<ProgressState>>,
}

pub struct Engine {
    settings: Arc<Settings>,
    http: Arc<HttpClient>,
    store: Arc<FileStore>,
    events: tokio::sync::mpsc::Sender<EngineEvent>,
    active: Arc<Mutex<HashMap<TaskId, ActiveTransfer>>>,
}

impl Engine {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<FileStore>,
        events: tokio::sync::mpsc::Sender<EngineEvent>,
    ) -> Self {
        let http = Arc::new(HttpClient::new(&settings));
        Self {
            settings,
            http,
            store,
            events,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_active(&self, id: &TaskId) -> bool {
        self.active.lock().unwrap().contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Start (or resume) a transfer. Blocking: probes the server and creates
    /// temp files, then spawns workers and returns. Call from a blocking
    /// context, never from an async executor thread.
    pub fn start(&self, mut task: DownloadTask) -> Result<(), DownloadError> {
        if self.is_active(&task.id) {
            return Ok(());
        }

        // Validate.
        if task.url.trim().is_empty() {
            return Err(DownloadError::InvalidUrl("empty URL".to_string()));
        }
        if !self.http.test_reachable(&task.url) {
            return Err(DownloadError::Network(format!(
                "{} is not reachable",
                task.url
            )));
        }

        // Probe.
        let info = self.http.probe(&task.url)?;
        task.file_size = info.file_size.unwrap_or(0);
        task.supports_range = info.supports_range;
        task.content_type = info.content_type.clone();
        task.response_headers = info.headers.clone();
        if let Some(hint) = &info.filename_hint {
            if task.filename_is_autogenerated() {
                task.filename = hint.clone();
            }
        }

        // A known zero-length resource completes without any transfer.
        if info.file_size == Some(0) {
            return self.complete_empty(task);
        }

        // Space.
        if task.file_size > 0 {
            let dest = task
                .destination
                .clone()
                .unwrap_or_else(|| self.settings.download_directory.clone());
            if !self.store.has_space(&dest, task.file_size) {
                return Err(DownloadError::InsufficientSpace {
                    required: task.file_size,
                    available: self.store.free_space(&dest),
                });
            }
        }

        // Plan parts, or keep the persisted plan when resuming. A multi-part
        // plan is only honoured while the server still accepts ranges;
        // otherwise every worker would restream the whole body.
        let resumable = setup::parts_are_resumable(&task)
            && (task.supports_range || task.parts.len() == 1);
        if !resumable {
            let n = setup::choose_worker_count(
                task.supports_range,
                task.file_size,
                self.settings.max_threads_per_download,
            );
            task.parts = if task.file_size > 0 {
                plan_parts(task.file_size, n)
            } else {
                vec![DownloadPart::open_ended()]
            };
        }
        task.num_workers = task.parts.len();

        // Temp files; on-disk sizes are the authoritative resume offsets.
        for part in &mut task.parts {
            let path = self.store.create_part_file(&task.id, part.part_number)?;
            part.downloaded_bytes = self.store.part_size(&path);
            part.temp_path = Some(path);
            if part.status != DownloadStatus::Completed {
                part.status = DownloadStatus::Pending;
            }
        }

        task.mark_started();
        let _ = self.events.blocking_send(EngineEvent::Status(task.clone()));

        self.spawn_transfer(task);
        Ok(())
    }

    fn spawn_transfer(&self, task: DownloadTask) {
        let task_id = task.id.clone();
        let part_count = task.parts.len();
        let abort = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(Mutex::new(ProgressState::new(task.clone())));
        let (results_tx, results_rx) = mpsc::channel();

        let ctx = Arc::new(worker::WorkerCtx {
            url: task.url.clone(),
            supports_range: task.supports_range,
            file_size: task.file_size,
            multi_part: part_count > 1,
            http: Arc::clone(&self.http),
            store: Arc::clone(&self.store),
            abort: Arc::clone(&abort),
            progress: Arc::clone(&progress),
            events: self.events.clone(),
            results: results_tx,
        });

        let mut workers = Vec::with_capacity(part_count);
        for part_number in 0..part_count as u32 {
            let ctx = Arc::clone(&ctx);
            let handle = std::thread::Builder::new()
                .name(format!("dlm-worker-{}-{}", task_id, part_number))
                .spawn(move || worker::run(ctx, part_number))
                .expect("spawn worker thread");
            workers.push(handle);
        }
        drop(ctx);

        let monitor_ctx = monitor::MonitorCtx {
            task_id: task_id.clone(),
            store: Arc::clone(&self.store),
            abort: Arc::clone(&abort),
            progress: Arc::clone(&progress),
            events: self.events.clone(),
            results: results_rx,
            active: Arc::clone(&self.active),
            expected: part_count,
        };
        let monitor = std::thread::Builder::new()
            .name(format!("dlm-monitor-{}", task_id))
            .spawn(move || monitor::run(monitor_ctx))
            .expect("spawn monitor thread");

        self.active.lock().unwrap().insert(
            task_id,
            ActiveTransfer {
                abort,
                workers,
                monitor: Some(monitor),
                progress,
            },
        );
    }

    fn complete_empty(&self, mut task: DownloadTask) -> Result<(), DownloadError> {
        let dir = task
            .destination
            .clone()
            .unwrap_or_else(|| self.store.category_dir(&task.filename));
        let final_path = self.store.merge(&[], &dir, &task.filename)?;
        if let Some(name) = final_path.file_name() {
            task.filename = name.to_string_lossy().into_owned();
        }
        task.destination = final_path.parent().map(PathBuf::from);
        task.num_workers = 1;
        task.mark_completed();
        let _ = self.events.blocking_send(EngineEvent::Status(task));
        Ok(())
    }

    /// Signal the task's workers and wait (bounded) for them to exit.
    /// Temp files and part progress are preserved; the caller transitions
    /// the task to Paused. Returns false when the task was not active.
    pub fn pause(&self, id: &TaskId) -> bool {
        self.stop_transfer(id).is_some()
    }

    /// As pause, but also deletes the task's temp files. The caller
    /// transitions the task to Cancelled.
    pub fn cancel(&self, id: &TaskId) -> bool {
        match self.stop_transfer(id) {
            Some(paths) => {
                self.store.cleanup(&paths);
                true
            }
            None => false,
        }
    }

    /// Pause every active transfer (process shutdown).
    pub fn shutdown(&self) {
        let ids: Vec<TaskId> = self.active.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.stop_transfer(&id);
        }
    }

    fn stop_transfer(&self, id: &TaskId) -> Option<Vec<PathBuf>> {
        let mut entry = self.active.lock().unwrap().remove(id)?;
        entry.abort.store(true, Ordering::Relaxed);

        let temp_paths = entry.progress.lock().unwrap().temp_paths();
        let deadline = Instant::now() + GRACEFUL_STOP_TIMEOUT;
        for handle in entry.workers.drain(..) {
            join_until(handle, deadline);
        }
        if let Some(monitor) = entry.monitor.take() {
            // The monitor observes the abort flag within one poll interval.
            let _ = monitor.join();
        }
        Some(temp_paths)
    }
}

/// Join a worker, giving up at `deadline`. An abandoned worker is detached;
/// it can only append to its own part file, which resume tolerates.
fn join_until(handle: std::thread::JoinHandle<()>, deadline: Instant) {
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }
        if Instant::now() >= deadline {
            tracing::warn!("worker did not stop within the grace period; abandoning");
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

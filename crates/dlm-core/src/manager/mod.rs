//! Download manager: task registry, priority queue, event fan-out, and
//! lifecycle glue between persistence, scheduler, and engine.

mod processor;
mod pump;
mod queue;

use crate::config::Settings;
use crate::engine::{Engine, EngineEvent};
use crate::error::DownloadError;
use crate::events::{EventBus, TaskListener};
use crate::file_store::FileStore;
use crate::persist::{Database, DownloadStats};
use crate::scheduler::Scheduler;
use crate::task::{unix_now, DownloadStatus, DownloadTask, TaskId};
use queue::TaskQueue;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Instant;

/// Parameters for a new download.
#[derive(Debug, Clone)]
pub struct AddRequest {
    pub url: String,
    pub filename: Option<String>,
    pub destination: Option<PathBuf>,
    pub scheduled_time: Option<f64>,
    pub priority: i32,
    /// Optional expected checksum, verified after merge.
    pub checksum: Option<String>,
}

impl AddRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: None,
            destination: None,
            scheduled_time: None,
            priority: 0,
            checksum: None,
        }
    }
}

/// Aggregate manager statistics: persisted counts plus live queue state.
#[derive(Debug, Clone)]
pub struct ManagerStats {
    pub downloads: DownloadStats,
    pub active: usize,
    pub queued: usize,
    pub scheduled: usize,
}

pub(crate) struct Shared {
    pub(crate) settings: Arc<Settings>,
    pub(crate) db: Database,
    pub(crate) store: Arc<FileStore>,
    pub(crate) engine: Arc<Engine>,
    pub(crate) scheduler: Scheduler,
    pub(crate) queue: TaskQueue,
    pub(crate) registry: StdRwLock<HashMap<TaskId, DownloadTask>>,
    pub(crate) active: StdMutex<HashSet<TaskId>>,
    pub(crate) events: EventBus,
    pub(crate) running: AtomicBool,
    pub(crate) last_flush: StdMutex<HashMap<TaskId, Instant>>,
}

pub struct Manager {
    shared: Arc<Shared>,
}

impl Manager {
    /// Build a manager on the default file store, recover persisted state,
    /// and start the queue processor, event pump, and scheduler.
    pub async fn new(settings: Arc<Settings>, db: Database) -> Result<Self, DownloadError> {
        let store = Arc::new(FileStore::new(Arc::clone(&settings))?);
        Self::with_store(settings, db, store).await
    }

    /// As `new`, with an explicit file store (tests use a sandboxed temp dir).
    pub async fn with_store(
        settings: Arc<Settings>,
        db: Database,
        store: Arc<FileStore>,
    ) -> Result<Self, DownloadError> {
        store.gc_old_parts(24);

        let (engine_tx, engine_rx) = tokio::sync::mpsc::channel::<EngineEvent>(256);
        let engine = Arc::new(Engine::new(
            Arc::clone(&settings),
            Arc::clone(&store),
            engine_tx,
        ));

        let shared = Arc::new(Shared {
            settings,
            db,
            store,
            engine,
            scheduler: Scheduler::new(),
            queue: TaskQueue::new(),
            registry: StdRwLock::new(HashMap::new()),
            active: StdMutex::new(HashSet::new()),
            events: EventBus::new(),
            running: AtomicBool::new(true),
            last_flush: StdMutex::new(HashMap::new()),
        });

        let manager = Self {
            shared: Arc::clone(&shared),
        };
        manager.recover().await?;

        // Scheduler releases feed the queue through a channel so the sync
        // worker thread never touches the database directly.
        let (release_tx, release_rx) = tokio::sync::mpsc::unbounded_channel::<DownloadTask>();
        shared.scheduler.start(Arc::new(move |task: DownloadTask| {
            let _ = release_tx.send(task);
        }));

        tokio::spawn(pump::run(Arc::clone(&shared), engine_rx));
        tokio::spawn(processor::run(Arc::clone(&shared)));
        tokio::spawn(release_loop(Arc::clone(&shared), release_rx));

        Ok(manager)
    }

    /// Load persisted tasks. Anything that was mid-transfer when the previous
    /// process died comes back as Paused; future-dated tasks go back on the
    /// scheduler.
    async fn recover(&self) -> Result<(), DownloadError> {
        let shared = &self.shared;
        let recovered = shared.db.recover_interrupted().await?;
        if recovered > 0 {
            tracing::info!(recovered, "reset interrupted downloads to paused");
        }

        let tasks = shared.db.load_all().await?;
        let now = unix_now();
        let mut registry = shared.registry.write().unwrap();
        for task in tasks {
            if task.is_scheduled(now) {
                shared.scheduler.schedule(task.clone());
            }
            registry.insert(task.id.clone(), task);
        }
        Ok(())
    }

    /// Validate, persist, and queue (or schedule) a new download.
    pub async fn add(&self, request: AddRequest) -> Result<DownloadTask, DownloadError> {
        let shared = &self.shared;
        validate_url(&request.url)?;

        {
            let registry = shared.registry.read().unwrap();
            let duplicate = registry
                .values()
                .any(|t| t.url == request.url && !t.status.is_terminal());
            if duplicate {
                return Err(DownloadError::DuplicateUrl(request.url));
            }
        }

        let mut task = DownloadTask::new(&request.url, request.filename, request.destination);
        task.max_retries = shared.settings.retry_attempts;
        task.priority = request.priority;
        task.scheduled_time = request.scheduled_time;
        task.checksum = request.checksum;

        shared.db.upsert_task(&task).await?;
        shared
            .registry
            .write()
            .unwrap()
            .insert(task.id.clone(), task.clone());

        if task.is_scheduled(unix_now()) {
            shared.scheduler.schedule(task.clone());
            shared.events.emit_status(&task);
            tracing::info!(task_id = %task.id, "download scheduled");
        } else {
            shared.enqueue(&task.id).await?;
            task = self
                .get(&task.id)
                .unwrap_or(task);
        }
        Ok(task)
    }

    /// Queue a Pending or Paused task for download. A task persisted as
    /// Queued by a previous process is accepted too: the restart emptied the
    /// in-memory queue, so it must be re-announced.
    pub async fn start(&self, id: &TaskId) -> Result<bool, DownloadError> {
        let status = self.status_of(id);
        match status {
            Some(DownloadStatus::Pending)
            | Some(DownloadStatus::Paused)
            | Some(DownloadStatus::Queued) => {
                self.shared.enqueue(id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Pause a downloading task: stop its workers, keep its temp files.
    pub async fn pause(&self, id: &TaskId) -> Result<bool, DownloadError> {
        if self.status_of(id) != Some(DownloadStatus::Downloading) {
            return Ok(false);
        }
        let engine = Arc::clone(&self.shared.engine);
        let engine_id = id.clone();
        let stopped = tokio::task::spawn_blocking(move || engine.pause(&engine_id))
            .await
            .unwrap_or(false);
        if !stopped {
            return Ok(false);
        }

        let snapshot = self.shared.update_task(id, |t| t.mark_paused());
        self.shared.active.lock().unwrap().remove(id);
        if let Some(task) = snapshot {
            self.shared.db.upsert_task(&task).await?;
            self.shared.events.emit_status(&task);
        }
        Ok(true)
    }

    /// Re-queue a paused task.
    pub async fn resume(&self, id: &TaskId) -> Result<bool, DownloadError> {
        if self.status_of(id) != Some(DownloadStatus::Paused) {
            return Ok(false);
        }
        self.shared.enqueue(id).await?;
        Ok(true)
    }

    /// Cancel a task in any non-terminal state. Temp files are removed.
    pub async fn cancel(&self, id: &TaskId) -> Result<bool, DownloadError> {
        let Some(status) = self.status_of(id) else {
            return Ok(false);
        };
        if status.is_terminal() {
            return Ok(false);
        }

        if status == DownloadStatus::Downloading {
            let engine = Arc::clone(&self.shared.engine);
            let engine_id = id.clone();
            tokio::task::spawn_blocking(move || engine.cancel(&engine_id)).await.ok();
        } else {
            // Not active: clean up whatever part files an earlier run left.
            if let Some(task) = self.get(id) {
                let paths: Vec<PathBuf> =
                    task.parts.iter().filter_map(|p| p.temp_path.clone()).collect();
                self.shared.store.cleanup(&paths);
            }
        }

        self.shared.scheduler.unschedule(id);
        self.shared.active.lock().unwrap().remove(id);
        let snapshot = self.shared.update_task(id, |t| t.mark_cancelled());
        if let Some(task) = snapshot {
            self.shared.db.upsert_task(&task).await?;
            self.shared.events.emit_status(&task);
        }
        Ok(true)
    }

    /// Cancel if needed, then remove the task from persistence and memory.
    pub async fn delete(&self, id: &TaskId) -> Result<bool, DownloadError> {
        if self.get(id).is_none() {
            return Ok(false);
        }
        self.cancel(id).await?;
        self.shared.db.delete_task(id).await?;
        self.shared.registry.write().unwrap().remove(id);
        self.shared.last_flush.lock().unwrap().remove(id);
        Ok(true)
    }

    /// Re-queue an errored task if its retry budget allows.
    pub async fn retry(&self, id: &TaskId) -> Result<bool, DownloadError> {
        let eligible = self
            .get(id)
            .map(|t| t.status == DownloadStatus::Error && t.can_retry())
            .unwrap_or(false);
        if !eligible {
            return Ok(false);
        }
        let snapshot = self.shared.update_task(id, |t| t.begin_retry());
        if let Some(task) = snapshot {
            self.shared.db.upsert_task(&task).await?;
            self.shared.events.emit_status(&task);
        }
        self.shared.enqueue(id).await?;
        Ok(true)
    }

    pub fn get(&self, id: &TaskId) -> Option<DownloadTask> {
        self.shared.registry.read().unwrap().get(id).cloned()
    }

    /// Every known task, newest first.
    pub fn list_all(&self) -> Vec<DownloadTask> {
        let mut tasks: Vec<DownloadTask> =
            self.shared.registry.read().unwrap().values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.total_cmp(&a.created_at));
        tasks
    }

    pub fn list_by_status(&self, status: DownloadStatus) -> Vec<DownloadTask> {
        self.list_all()
            .into_iter()
            .filter(|t| t.status == status)
            .collect()
    }

    pub fn list_active(&self) -> Vec<DownloadTask> {
        let active = self.shared.active.lock().unwrap().clone();
        self.list_all()
            .into_iter()
            .filter(|t| active.contains(&t.id))
            .collect()
    }

    pub async fn stats(&self) -> Result<ManagerStats, DownloadError> {
        Ok(ManagerStats {
            downloads: self.shared.db.stats().await?,
            active: self.shared.active.lock().unwrap().len(),
            queued: self.shared.queue.len(),
            scheduled: self.shared.scheduler.scheduled_count(),
        })
    }

    pub fn subscribe_progress(&self, listener: TaskListener) {
        self.shared.events.subscribe_progress(listener);
    }

    pub fn subscribe_status(&self, listener: TaskListener) {
        self.shared.events.subscribe_status(listener);
    }

    /// Stop background work and pause everything still transferring.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        shared.running.store(false, Ordering::SeqCst);

        let scheduler_stop = {
            let shared = Arc::clone(shared);
            tokio::task::spawn_blocking(move || shared.scheduler.stop())
        };
        let engine_stop = {
            let engine = Arc::clone(&shared.engine);
            tokio::task::spawn_blocking(move || engine.shutdown())
        };
        let _ = scheduler_stop.await;
        let _ = engine_stop.await;

        // Anything still marked Downloading was just stopped: persist as Paused.
        let downloading: Vec<TaskId> = shared
            .registry
            .read()
            .unwrap()
            .values()
            .filter(|t| t.status == DownloadStatus::Downloading)
            .map(|t| t.id.clone())
            .collect();
        for id in downloading {
            if let Some(task) = shared.update_task(&id, |t| t.mark_paused()) {
                let _ = shared.db.upsert_task(&task).await;
                shared.events.emit_status(&task);
            }
        }
    }

    fn status_of(&self, id: &TaskId) -> Option<DownloadStatus> {
        self.shared.registry.read().unwrap().get(id).map(|t| t.status)
    }
}

impl Shared {
    /// Mutate a task in the registry and return the updated snapshot.
    pub(crate) fn update_task<F>(&self, id: &TaskId, f: F) -> Option<DownloadTask>
    where
        F: FnOnce(&mut DownloadTask),
    {
        let mut registry = self.registry.write().unwrap();
        let task = registry.get_mut(id)?;
        f(task);
        Some(task.clone())
    }

    /// Transition a task to Queued, persist, and push it on the queue.
    pub(crate) async fn enqueue(&self, id: &TaskId) -> Result<(), DownloadError> {
        let Some(task) = self.update_task(id, |t| t.status = DownloadStatus::Queued) else {
            return Ok(());
        };
        self.db.upsert_task(&task).await?;
        self.queue.push(task.id.clone(), task.priority);
        self.events.emit_status(&task);
        Ok(())
    }
}

async fn release_loop(
    shared: Arc<Shared>,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<DownloadTask>,
) {
    while let Some(task) = rx.recv().await {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        // Only release tasks that still exist and still wait for their slot.
        let still_pending = shared
            .registry
            .read()
            .unwrap()
            .get(&task.id)
            .map(|t| t.status == DownloadStatus::Pending)
            .unwrap_or(false);
        if still_pending {
            if let Err(e) = shared.enqueue(&task.id).await {
                tracing::warn!(task_id = %task.id, "failed to enqueue scheduled task: {}", e);
            }
        }
    }
}

fn validate_url(url: &str) -> Result<(), DownloadError> {
    let parsed =
        url::Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DownloadError::InvalidUrl(format!(
            "unsupported scheme: {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(DownloadError::InvalidUrl(format!("{}: missing host", url)));
    }
    Ok(())
}

//! Shared setup for manager-level integration tests.

use dlm_core::config::Settings;
use dlm_core::file_store::FileStore;
use dlm_core::manager::Manager;
use dlm_core::persist::Database;
use dlm_core::task::{DownloadStatus, DownloadTask, TaskId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub struct TestEnv {
    pub tmp: TempDir,
    pub settings: Arc<Settings>,
    pub db: Database,
    pub manager: Manager,
}

impl TestEnv {
    pub fn download_dir(&self) -> PathBuf {
        self.settings.download_directory.clone()
    }
}

/// Manager over an in-memory database and a sandboxed part directory.
pub async fn manager_with<F>(configure: F) -> TestEnv
where
    F: FnOnce(&mut Settings),
{
    let tmp = tempfile::tempdir().expect("tempdir");
    let db = Database::open_memory().await.expect("open db");
    build(tmp, db, configure).await
}

/// Manager over an on-disk database, for restart tests.
pub async fn manager_at<F>(tmp: TempDir, db_path: &std::path::Path, configure: F) -> TestEnv
where
    F: FnOnce(&mut Settings),
{
    let db = Database::open_at(db_path).await.expect("open db");
    build(tmp, db, configure).await
}

async fn build<F>(tmp: TempDir, db: Database, configure: F) -> TestEnv
where
    F: FnOnce(&mut Settings),
{
    let mut settings = Settings::default();
    settings.download_directory = tmp.path().join("downloads");
    settings.connection_timeout = 10;
    settings.retry_delay = 1;
    configure(&mut settings);
    let settings = Arc::new(settings);

    let store = Arc::new(
        FileStore::with_temp_dir(tmp.path().join("parts"), Arc::clone(&settings))
            .expect("file store"),
    );
    let manager = Manager::with_store(Arc::clone(&settings), db.clone(), store)
        .await
        .expect("manager");

    TestEnv {
        tmp,
        settings,
        db,
        manager,
    }
}

/// Poll until the task reaches `status`, panicking after `timeout`.
pub async fn wait_for_status(
    manager: &Manager,
    id: &TaskId,
    status: DownloadStatus,
    timeout: Duration,
) -> DownloadTask {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(task) = manager.get(id) {
            if task.status == status {
                return task;
            }
            if Instant::now() >= deadline {
                panic!(
                    "task {} did not reach {:?} within {:?}; currently {:?} ({:?})",
                    id, status, timeout, task.status, task.error_message
                );
            }
        } else if Instant::now() >= deadline {
            panic!("task {} disappeared while waiting for {:?}", id, status);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

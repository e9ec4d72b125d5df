//! `dlm retry <id>` – re-queue an errored download.

use anyhow::{bail, Result};
use dlm_core::persist::Database;
use dlm_core::task::DownloadStatus;

pub async fn run(db: &Database, id: &str) -> Result<()> {
    let Some(mut task) = db.load_task(id).await? else {
        bail!("no such download: {}", id);
    };
    if task.status != DownloadStatus::Error {
        bail!("download {} is not errored", id);
    }
    if !task.can_retry() {
        bail!(
            "download {} exhausted its retry budget ({}/{})",
            id,
            task.retry_count,
            task.max_retries
        );
    }
    task.begin_retry();
    db.upsert_task(&task).await?;
    println!("Retrying download {} (run `dlm run` to transfer)", id);
    Ok(())
}

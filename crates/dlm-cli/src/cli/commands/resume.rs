//! `dlm resume <id>` – mark a paused download pending again.

use anyhow::{bail, Result};
use dlm_core::persist::Database;
use dlm_core::task::DownloadStatus;

pub async fn run(db: &Database, id: &str) -> Result<()> {
    let Some(task) = db.load_task(id).await? else {
        bail!("no such download: {}", id);
    };
    if task.status != DownloadStatus::Paused {
        bail!("download {} is not paused", id);
    }
    db.set_status(&task.id, DownloadStatus::Pending).await?;
    println!("Resumed download {} (run `dlm run` to transfer)", id);
    Ok(())
}

//! `dlm cancel <id>` – cancel a download.

use anyhow::{bail, Result};
use dlm_core::persist::Database;
use dlm_core::task::DownloadStatus;

pub async fn run(db: &Database, id: &str) -> Result<()> {
    let Some(task) = db.load_task(id).await? else {
        bail!("no such download: {}", id);
    };
    if task.status.is_terminal() {
        bail!("download {} is already {}", id, task.status.as_str());
    }
    db.set_status(&task.id, DownloadStatus::Cancelled).await?;
    println!("Cancelled download {}", id);
    Ok(())
}

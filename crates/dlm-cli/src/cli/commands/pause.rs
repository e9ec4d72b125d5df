//! `dlm pause <id>` – mark a download paused.

use anyhow::{bail, Result};
use dlm_core::persist::Database;
use dlm_core::task::DownloadStatus;

pub async fn run(db: &Database, id: &str) -> Result<()> {
    let Some(task) = db.load_task(id).await? else {
        bail!("no such download: {}", id);
    };
    match task.status {
        DownloadStatus::Pending | DownloadStatus::Queued | DownloadStatus::Downloading => {
            db.set_status(&task.id, DownloadStatus::Paused).await?;
            println!("Paused download {}", id);
            Ok(())
        }
        other => bail!("cannot pause a download that is {}", other.as_str()),
    }
}

//! `dlm stats` – aggregate statistics.

use anyhow::Result;
use dlm_core::persist::Database;
use dlm_core::task::DownloadStatus;

pub async fn run(db: &Database) -> Result<()> {
    let stats = db.stats().await?;
    println!("total:      {}", stats.total);
    for status in [
        DownloadStatus::Pending,
        DownloadStatus::Queued,
        DownloadStatus::Downloading,
        DownloadStatus::Paused,
        DownloadStatus::Completed,
        DownloadStatus::Error,
        DownloadStatus::Cancelled,
    ] {
        let n = stats.count(status);
        if n > 0 {
            println!("{:<11} {}", format!("{}:", status.as_str()), n);
        }
    }
    println!("downloaded: {} bytes", stats.total_bytes_downloaded);
    Ok(())
}

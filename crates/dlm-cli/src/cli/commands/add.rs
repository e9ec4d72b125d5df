//! `dlm add <url>` – record a new download; `dlm run` transfers it.

use anyhow::{bail, Result};
use dlm_core::config::Settings;
use dlm_core::persist::Database;
use dlm_core::task::{unix_now, DownloadTask};
use std::path::PathBuf;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    db: &Database,
    settings: &Settings,
    url: String,
    filename: Option<String>,
    dest: Option<String>,
    priority: i32,
    delay: Option<u64>,
    checksum: Option<String>,
) -> Result<()> {
    let parsed = url::Url::parse(&url)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        bail!("unsupported scheme: {}", parsed.scheme());
    }

    let duplicate = db
        .load_all()
        .await?
        .into_iter()
        .any(|t| t.url == url && !t.status.is_terminal());
    if duplicate {
        bail!("URL already exists in downloads: {}", url);
    }

    let mut task = DownloadTask::new(&url, filename, dest.map(PathBuf::from));
    task.max_retries = settings.retry_attempts;
    task.priority = priority;
    task.checksum = checksum;
    if let Some(secs) = delay {
        task.scheduled_time = Some(unix_now() + secs as f64);
    }

    db.upsert_task(&task).await?;
    match task.scheduled_time {
        Some(_) => println!("Scheduled download {} for URL: {}", task.id, url),
        None => println!("Added download {} for URL: {}", task.id, url),
    }
    Ok(())
}

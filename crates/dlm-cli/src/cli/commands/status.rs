//! `dlm status <id>` – show one download in detail.

use anyhow::{bail, Result};
use dlm_core::persist::Database;

pub async fn run(db: &Database, id: &str) -> Result<()> {
    let Some(task) = db.load_task(id).await? else {
        bail!("no such download: {}", id);
    };

    println!("id:          {}", task.id);
    println!("url:         {}", task.url);
    println!("filename:    {}", task.filename);
    if let Some(dest) = &task.destination {
        println!("destination: {}", dest.display());
    }
    println!("status:      {}", task.status.as_str());
    println!(
        "progress:    {:.1}% ({} / {} bytes)",
        task.progress_percent, task.downloaded_bytes, task.file_size
    );
    println!("workers:     {}", task.num_workers);
    println!("retries:     {} / {}", task.retry_count, task.max_retries);
    if let Some(err) = &task.error_message {
        println!("error:       {}", err);
    }
    if !task.parts.is_empty() {
        println!("parts:");
        for part in &task.parts {
            println!(
                "  #{} [{}-{}] {} bytes {}",
                part.part_number,
                part.start_byte,
                part.end_byte,
                part.downloaded_bytes,
                part.status.as_str()
            );
        }
    }
    Ok(())
}

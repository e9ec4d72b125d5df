//! `dlm list` – list all downloads.

use anyhow::Result;
use dlm_core::persist::Database;

pub async fn run(db: &Database) -> Result<()> {
    let tasks = db.load_all().await?;
    if tasks.is_empty() {
        println!("no downloads");
        return Ok(());
    }
    for task in tasks {
        println!(
            "{}  {:<11}  {:5.1}%  {}",
            task.id,
            task.status.as_str(),
            task.progress_percent,
            task.filename
        );
    }
    Ok(())
}

//! `dlm remove <id>` – delete a download record.

use anyhow::{bail, Result};
use dlm_core::persist::Database;

pub async fn run(db: &Database, id: &str) -> Result<()> {
    if db.load_task(id).await?.is_none() {
        bail!("no such download: {}", id);
    }
    db.delete_task(id).await?;
    println!("Removed download {}", id);
    Ok(())
}

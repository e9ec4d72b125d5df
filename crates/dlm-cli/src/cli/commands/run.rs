//! `dlm run` – drive the manager until the queue drains.

use anyhow::Result;
use dlm_core::config::Settings;
use dlm_core::manager::{AddRequest, Manager};
use dlm_core::persist::Database;
use dlm_core::task::DownloadStatus;
use std::sync::Arc;
use std::time::Duration;

const PROTOCOL_PREFIX: &str = "downloadmanager://";

pub async fn run(db: Database, settings: Settings, url: Option<String>) -> Result<()> {
    tracing::info!("starting download manager");
    let manager = Manager::new(Arc::new(settings), db).await?;

    manager.subscribe_status(Box::new(|task| {
        println!(
            "[{}] {} {}",
            task.id,
            task.status.as_str(),
            task.filename
        );
    }));
    manager.subscribe_progress(Box::new(|task| {
        println!(
            "[{}] {:5.1}%  {:>10}/s  eta {:.0}s",
            task.id,
            task.progress_percent,
            human_bytes(task.download_speed),
            task.eta_seconds
        );
    }));

    if let Some(url) = url {
        let url = decode_protocol_url(&url);
        manager.add(AddRequest::new(url)).await?;
    }

    // Kick everything that is waiting for a slot, including rows that were
    // queued when a previous process exited.
    for task in manager.list_all() {
        match task.status {
            DownloadStatus::Pending if task.scheduled_time.is_none() => {
                manager.start(&task.id).await?;
            }
            DownloadStatus::Queued => {
                manager.start(&task.id).await?;
            }
            _ => {}
        }
    }

    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let stats = manager.stats().await?;
        if stats.active == 0 && stats.queued == 0 && stats.scheduled == 0 {
            break;
        }
    }
    manager.shutdown().await;
    println!("queue drained");
    Ok(())
}

/// `downloadmanager://<encoded-url>` arrives via the URL-scheme handler.
fn decode_protocol_url(raw: &str) -> String {
    match raw.strip_prefix(PROTOCOL_PREFIX) {
        Some(encoded) => percent_decode(encoded),
        None => raw.to_string(),
    }
}

fn percent_decode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let mut bytes = s.as_bytes().iter().copied();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let pair = (bytes.next(), bytes.next());
            if let (Some(h), Some(l)) = pair {
                let decode = |c: u8| match c {
                    b'0'..=b'9' => Some(c - b'0'),
                    b'a'..=b'f' => Some(c - b'a' + 10),
                    b'A'..=b'F' => Some(c - b'A' + 10),
                    _ => None,
                };
                if let (Some(h), Some(l)) = (decode(h), decode(l)) {
                    out.push(h << 4 | l);
                    continue;
                }
            }
            out.push(b'%');
        } else {
            out.push(b);
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn human_bytes(rate: f64) -> String {
    if rate >= 1024.0 * 1024.0 {
        format!("{:.1} MiB", rate / (1024.0 * 1024.0))
    } else if rate >= 1024.0 {
        format!("{:.1} KiB", rate / 1024.0)
    } else {
        format!("{:.0} B", rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_urls_are_decoded() {
        assert_eq!(
            decode_protocol_url("downloadmanager://https%3A%2F%2Fexample.com%2Ff.bin"),
            "https://example.com/f.bin"
        );
        assert_eq!(
            decode_protocol_url("https://example.com/f.bin"),
            "https://example.com/f.bin"
        );
    }
}

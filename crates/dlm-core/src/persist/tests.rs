use super::Database;
use crate::task::{plan_parts, unix_now, DownloadStatus, DownloadTask};
use std::path::PathBuf;

fn sample_task(url: &str) -> DownloadTask {
    let mut task = DownloadTask::new(url, None, Some(PathBuf::from("/tmp/dest")));
    task.file_size = 4096;
    task.supports_range = true;
    task.num_workers = 4;
    task.parts = plan_parts(4096, 4);
    for (i, part) in task.parts.iter_mut().enumerate() {
        part.temp_path = Some(PathBuf::from(format!("/tmp/parts/{}_{}.tmp", task.id, i)));
    }
    task.response_headers
        .insert("etag".to_string(), "\"abc\"".to_string());
    task
}

#[tokio::test]
async fn upsert_and_load_roundtrip() {
    let db = Database::open_memory().await.unwrap();
    let task = sample_task("https://example.com/file.bin");
    db.upsert_task(&task).await.unwrap();

    let loaded = db.load_task(&task.id).await.unwrap().expect("task exists");
    assert_eq!(loaded.id, task.id);
    assert_eq!(loaded.url, task.url);
    assert_eq!(loaded.filename, "file.bin");
    assert_eq!(loaded.destination, Some(PathBuf::from("/tmp/dest")));
    assert_eq!(loaded.file_size, 4096);
    assert_eq!(loaded.status, DownloadStatus::Pending);
    assert_eq!(loaded.parts.len(), 4);
    assert_eq!(loaded.parts[0].start_byte, 0);
    assert_eq!(loaded.parts[3].end_byte, 4095);
    assert_eq!(
        loaded.response_headers.get("etag").map(String::as_str),
        Some("\"abc\"")
    );
}

#[tokio::test]
async fn upsert_is_idempotent() {
    let db = Database::open_memory().await.unwrap();
    let mut task = sample_task("https://example.com/file.bin");
    db.upsert_task(&task).await.unwrap();

    task.status = DownloadStatus::Downloading;
    task.parts[1].downloaded_bytes = 512;
    db.upsert_task(&task).await.unwrap();
    db.upsert_task(&task).await.unwrap();

    let all = db.load_all().await.unwrap();
    assert_eq!(all.len(), 1);
    let loaded = &all[0];
    assert_eq!(loaded.status, DownloadStatus::Downloading);
    assert_eq!(loaded.parts.len(), 4);
    assert_eq!(loaded.parts[1].downloaded_bytes, 512);
}

#[tokio::test]
async fn delete_cascades_to_parts() {
    let db = Database::open_memory().await.unwrap();
    let task = sample_task("https://example.com/a");
    db.upsert_task(&task).await.unwrap();
    db.delete_task(&task.id).await.unwrap();
    assert!(db.load_task(&task.id).await.unwrap().is_none());

    // Re-inserting the same id must not collide with orphaned parts.
    db.upsert_task(&task).await.unwrap();
    let loaded = db.load_task(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.parts.len(), 4);
}

#[tokio::test]
async fn update_progress_touches_only_counters() {
    let db = Database::open_memory().await.unwrap();
    let task = sample_task("https://example.com/a");
    db.upsert_task(&task).await.unwrap();

    db.update_progress(&task.id, 2048, 50.0, 1024.0, 2.0)
        .await
        .unwrap();
    let loaded = db.load_task(&task.id).await.unwrap().unwrap();
    assert_eq!(loaded.downloaded_bytes, 2048);
    assert!((loaded.progress_percent - 50.0).abs() < f64::EPSILON);
    assert!((loaded.download_speed - 1024.0).abs() < f64::EPSILON);
    assert_eq!(loaded.status, DownloadStatus::Pending);
}

#[tokio::test]
async fn recover_interrupted_rewrites_downloading_to_paused() {
    let db = Database::open_memory().await.unwrap();
    let mut a = sample_task("https://example.com/a");
    a.status = DownloadStatus::Downloading;
    let mut b = sample_task("https://example.com/b");
    b.status = DownloadStatus::Completed;
    db.upsert_task(&a).await.unwrap();
    db.upsert_task(&b).await.unwrap();

    let n = db.recover_interrupted().await.unwrap();
    assert_eq!(n, 1);
    assert_eq!(
        db.load_task(&a.id).await.unwrap().unwrap().status,
        DownloadStatus::Paused
    );
    assert_eq!(
        db.load_task(&b.id).await.unwrap().unwrap().status,
        DownloadStatus::Completed
    );
}

#[tokio::test]
async fn list_by_status_filters() {
    let db = Database::open_memory().await.unwrap();
    let mut a = sample_task("https://example.com/a");
    a.status = DownloadStatus::Paused;
    let mut b = sample_task("https://example.com/b");
    b.status = DownloadStatus::Error;
    db.upsert_task(&a).await.unwrap();
    db.upsert_task(&b).await.unwrap();

    let paused = db.list_by_status(DownloadStatus::Paused).await.unwrap();
    assert_eq!(paused.len(), 1);
    assert_eq!(paused[0].id, a.id);
    assert!(db
        .list_by_status(DownloadStatus::Completed)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn stats_counts_by_status() {
    let db = Database::open_memory().await.unwrap();
    let mut a = sample_task("https://example.com/a");
    a.status = DownloadStatus::Completed;
    a.downloaded_bytes = 4096;
    let mut b = sample_task("https://example.com/b");
    b.status = DownloadStatus::Completed;
    b.downloaded_bytes = 1000;
    let c = sample_task("https://example.com/c");
    db.upsert_task(&a).await.unwrap();
    db.upsert_task(&b).await.unwrap();
    db.upsert_task(&c).await.unwrap();

    let stats = db.stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.count(DownloadStatus::Completed), 2);
    assert_eq!(stats.count(DownloadStatus::Pending), 1);
    assert_eq!(stats.total_bytes_downloaded, 5096);
}

#[tokio::test]
async fn gc_completed_removes_only_old_tasks() {
    let db = Database::open_memory().await.unwrap();
    let mut old = sample_task("https://example.com/old");
    old.status = DownloadStatus::Completed;
    old.completed_at = Some(unix_now() - 40.0 * 86_400.0);
    let mut fresh = sample_task("https://example.com/fresh");
    fresh.status = DownloadStatus::Completed;
    fresh.completed_at = Some(unix_now());
    let running = sample_task("https://example.com/running");
    db.upsert_task(&old).await.unwrap();
    db.upsert_task(&fresh).await.unwrap();
    db.upsert_task(&running).await.unwrap();

    let removed = db.gc_completed(30).await.unwrap();
    assert_eq!(removed, 1);
    assert!(db.load_task(&old.id).await.unwrap().is_none());
    assert!(db.load_task(&fresh.id).await.unwrap().is_some());
    assert!(db.load_task(&running.id).await.unwrap().is_some());
}

#[tokio::test]
async fn scheduled_time_and_priority_roundtrip() {
    let db = Database::open_memory().await.unwrap();
    let mut task = sample_task("https://example.com/later");
    task.scheduled_time = Some(unix_now() + 3600.0);
    task.priority = 7;
    db.upsert_task(&task).await.unwrap();

    let loaded = db.load_task(&task.id).await.unwrap().unwrap();
    assert!(loaded.scheduled_time.unwrap() > unix_now());
    assert_eq!(loaded.priority, 7);
}

//! Queue ordering, scheduling, and duplicate-suppression scenarios.

mod common;

use common::harness::{manager_with, wait_for_status};
use common::range_server::{self, RangeServerOptions};
use dlm_core::error::DownloadError;
use dlm_core::manager::AddRequest;
use dlm_core::task::{DownloadStatus, TaskId};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn patterned_body(len: usize) -> Vec<u8> {
    (0u8..=255).cycle().take(len).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn priority_order_wins_over_insertion_order() {
    // One slot, held by a throttled download while A, B, C queue up.
    let blocker_server = range_server::start_with_options(
        patterned_body(400 * 1024),
        RangeServerOptions {
            throttle_bytes_per_sec: Some(100 * 1024),
            ..Default::default()
        },
    );
    let fast_server = range_server::start(patterned_body(8 * 1024));
    let env = manager_with(|s| {
        s.max_concurrent_downloads = 1;
        s.max_threads_per_download = 1;
    })
    .await;

    let started: Arc<Mutex<Vec<TaskId>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&started);
    env.manager.subscribe_status(Box::new(move |task| {
        if task.status == DownloadStatus::Downloading {
            sink.lock().unwrap().push(task.id.clone());
        }
    }));

    let blocker = env
        .manager
        .add(AddRequest::new(&blocker_server.url))
        .await
        .expect("add blocker");
    wait_for_status(
        &env.manager,
        &blocker.id,
        DownloadStatus::Downloading,
        Duration::from_secs(10),
    )
    .await;

    // Distinct URLs on the fast server (dedup is by URL string).
    let mut req_a = AddRequest::new(format!("{}?task=a", fast_server.url));
    req_a.priority = 0;
    let mut req_b = AddRequest::new(format!("{}?task=b", fast_server.url));
    req_b.priority = 10;
    let mut req_c = AddRequest::new(format!("{}?task=c", fast_server.url));
    req_c.priority = 5;

    let a = env.manager.add(req_a).await.expect("add a");
    let b = env.manager.add(req_b).await.expect("add b");
    let c = env.manager.add(req_c).await.expect("add c");

    for id in [&a.id, &b.id, &c.id] {
        wait_for_status(
            &env.manager,
            id,
            DownloadStatus::Completed,
            Duration::from_secs(30),
        )
        .await;
    }

    let order = started.lock().unwrap().clone();
    assert_eq!(
        order,
        vec![blocker.id, b.id, c.id, a.id],
        "execution order must follow priority, FIFO within ties"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduled_task_releases_on_time() {
    let server = range_server::start(patterned_body(4 * 1024));
    let env = manager_with(|_| {}).await;

    // Status listeners fire synchronously, so the Queued transition cannot
    // be missed the way polling could miss it.
    let queued_at: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&queued_at);
    env.manager.subscribe_status(Box::new(move |task| {
        if task.status == DownloadStatus::Queued {
            sink.lock().unwrap().get_or_insert_with(Instant::now);
        }
    }));

    let mut request = AddRequest::new(&server.url);
    request.scheduled_time = Some(dlm_core::task::unix_now() + 2.0);
    let added_at = Instant::now();
    let task = env.manager.add(request).await.expect("add");
    assert_eq!(task.status, DownloadStatus::Pending);

    // Not released early.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(
        env.manager.get(&task.id).unwrap().status,
        DownloadStatus::Pending
    );
    assert!(queued_at.lock().unwrap().is_none());

    wait_for_status(
        &env.manager,
        &task.id,
        DownloadStatus::Completed,
        Duration::from_secs(20),
    )
    .await;

    let released = queued_at.lock().unwrap().expect("task was queued");
    let elapsed = released.duration_since(added_at);
    assert!(
        elapsed >= Duration::from_millis(1950),
        "released early: {:?}",
        elapsed
    );
    assert!(
        elapsed <= Duration::from_millis(3000),
        "released late: {:?}",
        elapsed
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_url_rejected_until_terminal() {
    let server = range_server::start_with_options(
        patterned_body(400 * 1024),
        RangeServerOptions {
            throttle_bytes_per_sec: Some(100 * 1024),
            ..Default::default()
        },
    );
    let env = manager_with(|s| s.max_threads_per_download = 1).await;

    let first = env
        .manager
        .add(AddRequest::new(&server.url))
        .await
        .expect("first add");

    let rejected = env.manager.add(AddRequest::new(&server.url)).await;
    assert!(matches!(rejected, Err(DownloadError::DuplicateUrl(_))));

    // Cancelling the first frees the URL for a new task.
    env.manager.cancel(&first.id).await.expect("cancel");
    let second = env
        .manager
        .add(AddRequest::new(&server.url))
        .await
        .expect("re-add after cancel");
    assert_ne!(second.id, first.id);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_urls_are_rejected_without_creating_tasks() {
    let env = manager_with(|_| {}).await;

    for url in ["not a url", "ftp://example.com/f.bin", "file:///etc/passwd"] {
        let result = env.manager.add(AddRequest::new(url)).await;
        assert!(
            matches!(result, Err(DownloadError::InvalidUrl(_))),
            "{} should be invalid",
            url
        );
    }
    assert!(env.manager.list_all().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_cap_bounds_active_downloads() {
    let server = range_server::start_with_options(
        patterned_body(300 * 1024),
        RangeServerOptions {
            throttle_bytes_per_sec: Some(150 * 1024),
            ..Default::default()
        },
    );
    let env = manager_with(|s| {
        s.max_concurrent_downloads = 2;
        s.max_threads_per_download = 1;
    })
    .await;

    let mut ids = Vec::new();
    for i in 0..4 {
        let task = env
            .manager
            .add(AddRequest::new(format!("{}?n={}", server.url, i)))
            .await
            .expect("add");
        ids.push(task.id);
    }

    // Sample the active set while the queue drains.
    let mut max_active = 0;
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        max_active = max_active.max(env.manager.list_active().len());
        let all_done = ids
            .iter()
            .all(|id| env.manager.get(id).map(|t| t.status == DownloadStatus::Completed).unwrap_or(false));
        if all_done {
            break;
        }
        assert!(Instant::now() < deadline, "queue did not drain");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(max_active <= 2, "active count exceeded the cap: {}", max_active);
}

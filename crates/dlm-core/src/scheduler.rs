//! Time-ordered release of future-dated tasks.
//!
//! A min-heap of `(scheduled_time, task)` entries and one worker thread
//! parked on a condvar. When the top entry comes due the worker pops it and
//! invokes the release callback (the manager enqueues it from there).

use crate::task::{unix_now, DownloadTask, TaskId};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Upper bound on a single condvar wait, so the worker re-checks the clock at
/// least once a minute even if the system clock jumps.
const MAX_WAIT: Duration = Duration::from_secs(60);

pub type ReleaseCallback = Arc<dyn Fn(DownloadTask) + Send + Sync>;

struct Entry {
    scheduled_time: f64,
    seq: u64,
    task: DownloadTask,
}

// Heap order: earliest time first; the sequence number only makes the order
// total. Release order among equal times is deliberately unspecified.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.scheduled_time == other.scheduled_time && self.seq == other.seq
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.scheduled_time
            .total_cmp(&other.scheduled_time)
            .then(self.seq.cmp(&other.seq))
    }
}

struct Inner {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    cond: Condvar,
    running: AtomicBool,
    seq: AtomicU64,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                heap: Mutex::new(BinaryHeap::new()),
                cond: Condvar::new(),
                running: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start the worker thread. Idempotent.
    pub fn start(&self, release: ReleaseCallback) {
        if self.inner.running.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("dlm-scheduler".into())
            .spawn(move || worker_loop(inner, release))
            .expect("spawn scheduler thread");
        *self.worker.lock().unwrap() = Some(handle);
    }

    /// Stop the worker and join it. Scheduled entries are left in the heap.
    pub fn stop(&self) {
        self.inner.running.store(false, AtomicOrdering::SeqCst);
        self.inner.cond.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Push a future-dated task. Returns false (and schedules nothing) when
    /// `scheduled_time` is absent or not in the future.
    pub fn schedule(&self, task: DownloadTask) -> bool {
        let Some(time) = task.scheduled_time else {
            return false;
        };
        if time <= unix_now() {
            return false;
        }
        let seq = self.inner.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.inner.heap.lock().unwrap().push(Reverse(Entry {
            scheduled_time: time,
            seq,
            task,
        }));
        self.inner.cond.notify_one();
        true
    }

    /// Remove a task from the schedule. O(n) rebuild of the heap.
    pub fn unschedule(&self, id: &TaskId) -> bool {
        let mut heap = self.inner.heap.lock().unwrap();
        let before = heap.len();
        let entries: Vec<Reverse<Entry>> =
            heap.drain().filter(|Reverse(e)| &e.task.id != id).collect();
        let removed = before != entries.len();
        *heap = entries.into_iter().collect();
        drop(heap);
        if removed {
            self.inner.cond.notify_one();
        }
        removed
    }

    /// Move a task to a new release time.
    pub fn reschedule(&self, id: &TaskId, new_time: f64) -> bool {
        let mut task = {
            let mut heap = self.inner.heap.lock().unwrap();
            let mut found = None;
            let entries: Vec<Reverse<Entry>> = heap
                .drain()
                .filter_map(|Reverse(e)| {
                    if &e.task.id == id {
                        found = Some(e.task);
                        None
                    } else {
                        Some(Reverse(e))
                    }
                })
                .collect();
            *heap = entries.into_iter().collect();
            match found {
                Some(t) => t,
                None => return false,
            }
        };
        task.scheduled_time = Some(new_time);
        self.schedule(task)
    }

    /// Drop every scheduled entry. Returns how many were dropped.
    pub fn clear_all(&self) -> usize {
        let mut heap = self.inner.heap.lock().unwrap();
        let n = heap.len();
        heap.clear();
        n
    }

    /// Entries whose release time has already passed (left in the heap).
    pub fn due_tasks(&self) -> Vec<DownloadTask> {
        let now = unix_now();
        self.inner
            .heap
            .lock()
            .unwrap()
            .iter()
            .filter(|Reverse(e)| e.scheduled_time <= now)
            .map(|Reverse(e)| e.task.clone())
            .collect()
    }

    /// Remove entries overdue by more than `max_age_hours` and never
    /// released (e.g. the worker was stopped). Returns how many were removed.
    pub fn gc_stale(&self, max_age_hours: u64) -> usize {
        let cutoff = unix_now() - max_age_hours as f64 * 3600.0;
        let mut heap = self.inner.heap.lock().unwrap();
        let before = heap.len();
        let entries: Vec<Reverse<Entry>> = heap
            .drain()
            .filter(|Reverse(e)| e.scheduled_time >= cutoff)
            .collect();
        let removed = before - entries.len();
        *heap = entries.into_iter().collect();
        removed
    }

    /// Release time of the earliest scheduled entry.
    pub fn next_due_time(&self) -> Option<f64> {
        self.inner
            .heap
            .lock()
            .unwrap()
            .peek()
            .map(|Reverse(e)| e.scheduled_time)
    }

    pub fn scheduled_count(&self) -> usize {
        self.inner.heap.lock().unwrap().len()
    }
}

fn worker_loop(inner: Arc<Inner>, release: ReleaseCallback) {
    let mut heap = inner.heap.lock().unwrap();
    while inner.running.load(AtomicOrdering::SeqCst) {
        let Some(Reverse(top)) = heap.peek() else {
            heap = inner.cond.wait(heap).unwrap();
            continue;
        };

        let now = unix_now();
        if top.scheduled_time <= now {
            let Reverse(entry) = heap.pop().expect("peeked entry");
            drop(heap);
            tracing::debug!(task_id = %entry.task.id, "releasing scheduled task");
            release(entry.task);
            heap = inner.heap.lock().unwrap();
        } else {
            let wait = Duration::from_secs_f64(top.scheduled_time - now).min(MAX_WAIT);
            let (guard, _timeout) = inner.cond.wait_timeout(heap, wait).unwrap();
            heap = guard;
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.running.store(false, AtomicOrdering::SeqCst);
        self.inner.cond.notify_all();
    }
}

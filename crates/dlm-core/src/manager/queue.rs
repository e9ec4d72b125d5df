//! Priority queue of task ids awaiting a download slot.
//!
//! Higher priority dequeues first; equal priorities dequeue FIFO via a
//! monotonic sequence number.

use crate::task::TaskId;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration;

struct QueuedEntry {
    priority: i32,
    seq: u64,
    task_id: TaskId,
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedEntry {}
impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the older sequence number.
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub(super) struct TaskQueue {
    heap: Mutex<BinaryHeap<QueuedEntry>>,
    seq: AtomicU64,
    notify: tokio::sync::Notify,
}

impl TaskQueue {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn push(&self, task_id: TaskId, priority: i32) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().unwrap().push(QueuedEntry {
            priority,
            seq,
            task_id,
        });
        self.notify.notify_one();
    }

    pub(super) fn pop(&self) -> Option<TaskId> {
        self.heap.lock().unwrap().pop().map(|e| e.task_id)
    }

    /// Pop, waiting up to `timeout` for an entry to arrive.
    pub(super) async fn pop_wait(&self, timeout: Duration) -> Option<TaskId> {
        if let Some(id) = self.pop() {
            return Some(id);
        }
        tokio::select! {
            _ = self.notify.notified() => self.pop(),
            _ = tokio::time::sleep(timeout) => None,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_pops_first() {
        let q = TaskQueue::new();
        q.push("a".to_string(), 0);
        q.push("b".to_string(), 10);
        q.push("c".to_string(), 5);
        assert_eq!(q.pop().as_deref(), Some("b"));
        assert_eq!(q.pop().as_deref(), Some("c"));
        assert_eq!(q.pop().as_deref(), Some("a"));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn fifo_within_equal_priority() {
        let q = TaskQueue::new();
        q.push("first".to_string(), 1);
        q.push("second".to_string(), 1);
        q.push("third".to_string(), 1);
        assert_eq!(q.pop().as_deref(), Some("first"));
        assert_eq!(q.pop().as_deref(), Some("second"));
        assert_eq!(q.pop().as_deref(), Some("third"));
    }

    #[test]
    fn negative_priorities_sort_last() {
        let q = TaskQueue::new();
        q.push("low".to_string(), -5);
        q.push("normal".to_string(), 0);
        assert_eq!(q.pop().as_deref(), Some("normal"));
        assert_eq!(q.pop().as_deref(), Some("low"));
    }

    #[tokio::test]
    async fn pop_wait_times_out_when_empty() {
        let q = TaskQueue::new();
        let popped = q.pop_wait(Duration::from_millis(50)).await;
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn pop_wait_wakes_on_push() {
        let q = std::sync::Arc::new(TaskQueue::new());
        let q2 = std::sync::Arc::clone(&q);
        let waiter = tokio::spawn(async move { q2.pop_wait(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push("x".to_string(), 0);
        let got = waiter.await.unwrap();
        assert_eq!(got.as_deref(), Some("x"));
    }
}

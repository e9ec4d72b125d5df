//! Typed event bus for progress and status updates.
//!
//! Two sinks, each receiving an immutable task snapshot. Listeners are
//! invoked synchronously from the manager's event pump; a listener that
//! needs async handling dispatches itself.

use crate::task::DownloadTask;
use std::sync::RwLock;

pub type TaskListener = Box<dyn Fn(&DownloadTask) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    progress: RwLock<Vec<TaskListener>>,
    status: RwLock<Vec<TaskListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_progress(&self, listener: TaskListener) {
        self.progress.write().unwrap().push(listener);
    }

    pub fn subscribe_status(&self, listener: TaskListener) {
        self.status.write().unwrap().push(listener);
    }

    pub fn emit_progress(&self, task: &DownloadTask) {
        for listener in self.progress.read().unwrap().iter() {
            listener(task);
        }
    }

    pub fn emit_status(&self, task: &DownloadTask) {
        for listener in self.status.read().unwrap().iter() {
            listener(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::DownloadTask;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn listeners_receive_events() {
        let bus = EventBus::new();
        let progress_count = Arc::new(AtomicUsize::new(0));
        let status_count = Arc::new(AtomicUsize::new(0));

        let p = Arc::clone(&progress_count);
        bus.subscribe_progress(Box::new(move |_t| {
            p.fetch_add(1, Ordering::SeqCst);
        }));
        let s = Arc::clone(&status_count);
        bus.subscribe_status(Box::new(move |_t| {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        let task = DownloadTask::new("https://example.com/x.bin", None, None);
        bus.emit_progress(&task);
        bus.emit_progress(&task);
        bus.emit_status(&task);

        assert_eq!(progress_count.load(Ordering::SeqCst), 2);
        assert_eq!(status_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multiple_listeners_all_fire() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = Arc::clone(&count);
            bus.subscribe_status(Box::new(move |_t| {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let task = DownloadTask::new("https://example.com/x.bin", None, None);
        bus.emit_status(&task);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}

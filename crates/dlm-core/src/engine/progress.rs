//! Per-task progress aggregation.
//!
//! One mutex per active task guards the live part counters. Every worker
//! chunk updates its own part, recomputes the task totals, and at most once
//! per 250 ms produces a snapshot for the event stream.

use crate::task::{DownloadStatus, DownloadTask};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Minimum interval between progress events for one task.
pub(super) const COALESCE_INTERVAL: Duration = Duration::from_millis(250);

pub(crate) struct ProgressState {
    task: DownloadTask,
    started: Instant,
    last_emit: Option<Instant>,
}

impl ProgressState {
    pub(super) fn new(task: DownloadTask) -> Self {
        Self {
            task,
            started: Instant::now(),
            last_emit: None,
        }
    }

    /// Range, progress, and temp path of one part.
    pub(super) fn part_info(&self, part_number: u32) -> (u64, u64, u64, Option<PathBuf>) {
        let p = &self.task.parts[part_number as usize];
        (p.start_byte, p.end_byte, p.downloaded_bytes, p.temp_path.clone())
    }

    pub(super) fn set_part_status(&mut self, part_number: u32, status: DownloadStatus) {
        self.task.parts[part_number as usize].status = status;
    }

    /// Drop a part's progress (restart of a non-resumable transfer).
    pub(super) fn reset_part(&mut self, part_number: u32) {
        self.task.parts[part_number as usize].downloaded_bytes = 0;
        self.refresh_totals();
    }

    /// Record `delta` received bytes for a part. Returns a snapshot when the
    /// coalescing interval has elapsed since the last emitted event.
    pub(super) fn record_chunk(&mut self, part_number: u32, delta: u64) -> Option<DownloadTask> {
        self.task.parts[part_number as usize].downloaded_bytes += delta;
        self.refresh_totals();

        let due = match self.last_emit {
            None => true,
            Some(at) => at.elapsed() >= COALESCE_INTERVAL,
        };
        if due {
            self.last_emit = Some(Instant::now());
            Some(self.task.clone())
        } else {
            None
        }
    }

    pub(super) fn snapshot(&self) -> DownloadTask {
        self.task.clone()
    }

    pub(super) fn temp_paths(&self) -> Vec<PathBuf> {
        self.task
            .parts
            .iter()
            .filter_map(|p| p.temp_path.clone())
            .collect()
    }

    fn refresh_totals(&mut self) {
        let total = self.task.total_downloaded();
        let elapsed = self.started.elapsed().as_secs_f64();
        self.task.apply_progress(total, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::plan_parts;

    fn state() -> ProgressState {
        let mut task = DownloadTask::new("https://example.com/p.bin", None, None);
        task.file_size = 1000;
        task.parts = plan_parts(1000, 2);
        ProgressState::new(task)
    }

    #[test]
    fn task_total_is_sum_of_parts() {
        let mut s = state();
        s.record_chunk(0, 100);
        s.record_chunk(1, 250);
        let snap = s.snapshot();
        assert_eq!(snap.downloaded_bytes, 350);
        assert_eq!(snap.total_downloaded(), 350);
        assert!((snap.progress_percent - 35.0).abs() < f64::EPSILON);
    }

    #[test]
    fn first_chunk_emits_then_coalesces() {
        let mut s = state();
        assert!(s.record_chunk(0, 10).is_some());
        // Within the coalescing window nothing more is emitted.
        assert!(s.record_chunk(0, 10).is_none());
        assert!(s.record_chunk(1, 10).is_none());
        std::thread::sleep(COALESCE_INTERVAL + Duration::from_millis(20));
        assert!(s.record_chunk(1, 10).is_some());
    }

    #[test]
    fn progress_is_monotonic_across_snapshots() {
        let mut s = state();
        let mut last = 0;
        for _ in 0..10 {
            if let Some(snap) = s.record_chunk(0, 7) {
                assert!(snap.downloaded_bytes >= last);
                last = snap.downloaded_bytes;
            }
        }
        assert!(s.snapshot().downloaded_bytes >= last);
    }

    #[test]
    fn reset_part_clears_its_counter() {
        let mut s = state();
        s.record_chunk(0, 100);
        s.record_chunk(1, 50);
        s.reset_part(0);
        assert_eq!(s.snapshot().downloaded_bytes, 50);
    }
}

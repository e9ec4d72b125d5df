//! Task and part entities: identity, lifecycle, part planning, progress math.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque task identifier: 12 lowercase hex chars derived at creation.
pub type TaskId = String;

/// Current unix time in seconds, with sub-second precision.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// High-level task state, stored as a lowercase string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadStatus {
    Pending,
    Queued,
    Downloading,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Queued => "queued",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Error => "error",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => DownloadStatus::Pending,
            "queued" => DownloadStatus::Queued,
            "downloading" => DownloadStatus::Downloading,
            "paused" => DownloadStatus::Paused,
            "completed" => DownloadStatus::Completed,
            "cancelled" => DownloadStatus::Cancelled,
            _ => DownloadStatus::Error,
        }
    }

    /// Completed and Cancelled never re-enter the queue; Error can, via retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Cancelled)
    }
}

/// One contiguous byte range of a task, downloaded by one worker.
///
/// `end_byte` is inclusive. For a task whose size is unknown at probe time
/// there is a single part with `end_byte = 0`; the worker streams the full
/// body and the range bounds are not meaningful.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadPart {
    pub part_number: u32,
    pub start_byte: u64,
    pub end_byte: u64,
    pub downloaded_bytes: u64,
    pub status: DownloadStatus,
    pub temp_path: Option<PathBuf>,
}

impl DownloadPart {
    pub fn new(part_number: u32, start_byte: u64, end_byte: u64) -> Self {
        Self {
            part_number,
            start_byte,
            end_byte,
            downloaded_bytes: 0,
            status: DownloadStatus::Pending,
            temp_path: None,
        }
    }

    /// Single open-ended part for a transfer whose total size is unknown.
    pub fn open_ended() -> Self {
        Self::new(0, 0, 0)
    }

    /// Total bytes this part covers (meaningless for open-ended parts).
    pub fn len(&self) -> u64 {
        self.end_byte - self.start_byte + 1
    }

    pub fn is_complete(&self) -> bool {
        self.status == DownloadStatus::Completed
    }
}

/// Splits `[0, file_size - 1]` into `num_workers` parts.
///
/// Parts split evenly; the last part absorbs the remainder. Requires
/// `file_size > 0`. The result tiles the range with no gaps or overlaps.
pub fn plan_parts(file_size: u64, num_workers: usize) -> Vec<DownloadPart> {
    debug_assert!(file_size > 0);
    let num_workers = num_workers.max(1) as u64;
    if num_workers == 1 || file_size < num_workers {
        return vec![DownloadPart::new(0, 0, file_size - 1)];
    }

    let part_size = file_size / num_workers;
    let mut parts = Vec::with_capacity(num_workers as usize);
    for i in 0..num_workers {
        let start = i * part_size;
        let end = if i == num_workers - 1 {
            file_size - 1
        } else {
            start + part_size - 1
        };
        parts.push(DownloadPart::new(i as u32, start, end));
    }
    parts
}

/// A single logical download: one user-requested URL -> file transfer.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    // Immutable after creation.
    pub id: TaskId,
    pub url: String,
    pub created_at: f64,

    pub filename: String,
    /// Destination directory. `None` means "decide at merge time" (default
    /// download directory, or a category subdirectory when auto-organize is on).
    pub destination: Option<PathBuf>,
    /// Total size in bytes; 0 until the HEAD probe (or when the server sent no length).
    pub file_size: u64,
    pub downloaded_bytes: u64,
    pub status: DownloadStatus,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub supports_range: bool,
    pub num_workers: usize,
    pub parts: Vec<DownloadPart>,

    // Derived progress values, refreshed by the engine.
    pub download_speed: f64,
    pub eta_seconds: f64,
    pub progress_percent: f64,

    pub content_type: Option<String>,
    pub response_headers: HashMap<String, String>,
    /// Expected checksum of the final file, if the caller supplied one.
    pub checksum: Option<String>,

    /// Unix time at which the task becomes due; `None` = immediate.
    pub scheduled_time: Option<f64>,
    /// Higher values dequeue earlier.
    pub priority: i32,
}

impl DownloadTask {
    pub fn new(url: &str, filename: Option<String>, destination: Option<PathBuf>) -> Self {
        let created_at = unix_now();
        let id = generate_id(url, created_at);
        let filename = filename
            .filter(|f| !f.is_empty())
            .or_else(|| crate::filename::from_url(url))
            .unwrap_or_else(|| format!("download_{}", id));
        Self {
            id,
            url: url.to_string(),
            created_at,
            filename,
            destination,
            file_size: 0,
            downloaded_bytes: 0,
            status: DownloadStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            supports_range: false,
            num_workers: 1,
            parts: Vec::new(),
            download_speed: 0.0,
            eta_seconds: 0.0,
            progress_percent: 0.0,
            content_type: None,
            response_headers: HashMap::new(),
            checksum: None,
            scheduled_time: None,
            priority: 0,
        }
    }

    /// True when the filename was synthesised rather than taken from the URL
    /// or the server. A probe filename hint replaces such names.
    pub fn filename_is_autogenerated(&self) -> bool {
        self.filename.starts_with("download_")
    }

    pub fn total_downloaded(&self) -> u64 {
        self.parts.iter().map(|p| p.downloaded_bytes).sum()
    }

    /// Refresh the derived progress fields from a byte count and elapsed time.
    pub fn apply_progress(&mut self, downloaded: u64, elapsed_secs: f64) {
        self.downloaded_bytes = downloaded;
        self.progress_percent = if self.file_size > 0 {
            100.0 * downloaded as f64 / self.file_size as f64
        } else {
            0.0
        };
        self.download_speed = if elapsed_secs > 0.0 {
            downloaded as f64 / elapsed_secs
        } else {
            0.0
        };
        self.eta_seconds = if self.download_speed > 0.0 && self.file_size > 0 {
            (self.file_size.saturating_sub(downloaded)) as f64 / self.download_speed
        } else {
            0.0
        };
    }

    pub fn mark_started(&mut self) {
        self.status = DownloadStatus::Downloading;
        self.started_at = Some(unix_now());
        self.error_message = None;
    }

    pub fn mark_completed(&mut self) {
        self.status = DownloadStatus::Completed;
        self.completed_at = Some(unix_now());
        self.downloaded_bytes = self.file_size;
        self.progress_percent = 100.0;
        self.eta_seconds = 0.0;
    }

    pub fn mark_errored(&mut self, message: &str) {
        self.status = DownloadStatus::Error;
        self.error_message = Some(message.to_string());
    }

    pub fn mark_paused(&mut self) {
        self.status = DownloadStatus::Paused;
    }

    pub fn mark_cancelled(&mut self) {
        self.status = DownloadStatus::Cancelled;
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Consume one retry and reset the task for re-queueing.
    pub fn begin_retry(&mut self) {
        self.retry_count += 1;
        self.status = DownloadStatus::Pending;
        self.error_message = None;
    }

    pub fn is_scheduled(&self, now: f64) -> bool {
        self.scheduled_time.map(|t| t > now).unwrap_or(false)
    }
}

/// Derive a 12-hex-char id from the URL and creation timestamp.
fn generate_id(url: &str, created_at: f64) -> TaskId {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(format!("{:.6}", created_at).as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_12_hex_chars() {
        let task = DownloadTask::new("https://example.com/file.bin", None, None);
        assert_eq!(task.id.len(), 12);
        assert!(task.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_differ_for_same_url() {
        let a = generate_id("https://example.com/x", 100.0);
        let b = generate_id("https://example.com/x", 100.5);
        assert_ne!(a, b);
    }

    #[test]
    fn filename_from_url_or_autogenerated() {
        let task = DownloadTask::new("https://example.com/dir/report.pdf?q=1", None, None);
        assert_eq!(task.filename, "report.pdf");
        assert!(!task.filename_is_autogenerated());

        let task = DownloadTask::new("https://example.com/api/fetch", None, None);
        assert_eq!(task.filename, format!("download_{}", task.id));
        assert!(task.filename_is_autogenerated());

        let task = DownloadTask::new(
            "https://example.com/x",
            Some("given.iso".to_string()),
            None,
        );
        assert_eq!(task.filename, "given.iso");
    }

    #[test]
    fn filename_from_url_percent_decoded() {
        let task = DownloadTask::new("https://example.com/my%20file.txt", None, None);
        assert_eq!(task.filename, "my file.txt");
    }

    #[test]
    fn plan_parts_tiles_range() {
        let parts = plan_parts(10 * 1024 * 1024, 4);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].start_byte, 0);
        for w in parts.windows(2) {
            assert_eq!(w[1].start_byte, w[0].end_byte + 1);
        }
        assert_eq!(parts.last().unwrap().end_byte, 10 * 1024 * 1024 - 1);
        let covered: u64 = parts.iter().map(|p| p.len()).sum();
        assert_eq!(covered, 10 * 1024 * 1024);
    }

    #[test]
    fn plan_parts_last_absorbs_remainder() {
        let parts = plan_parts(10, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 3);
        assert_eq!(parts[1].len(), 3);
        assert_eq!(parts[2].len(), 4);
        assert_eq!(parts[2].end_byte, 9);
    }

    #[test]
    fn plan_parts_tiny_file_collapses_to_one() {
        let parts = plan_parts(1, 8);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].start_byte, 0);
        assert_eq!(parts[0].end_byte, 0);
    }

    #[test]
    fn progress_math() {
        let mut task = DownloadTask::new("https://example.com/a.bin", None, None);
        task.file_size = 1000;
        task.apply_progress(250, 2.0);
        assert!((task.progress_percent - 25.0).abs() < f64::EPSILON);
        assert!((task.download_speed - 125.0).abs() < f64::EPSILON);
        assert!((task.eta_seconds - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_zero_size_and_zero_speed() {
        let mut task = DownloadTask::new("https://example.com/a.bin", None, None);
        task.apply_progress(500, 0.0);
        assert_eq!(task.progress_percent, 0.0);
        assert_eq!(task.download_speed, 0.0);
        assert_eq!(task.eta_seconds, 0.0);
    }

    #[test]
    fn retry_budget() {
        let mut task = DownloadTask::new("https://example.com/a.bin", None, None);
        task.max_retries = 2;
        task.mark_errored("boom");
        assert!(task.can_retry());
        task.begin_retry();
        assert_eq!(task.status, DownloadStatus::Pending);
        assert_eq!(task.error_message, None);
        task.begin_retry();
        assert!(!task.can_retry());
    }

    #[test]
    fn status_string_roundtrip() {
        for s in [
            DownloadStatus::Pending,
            DownloadStatus::Queued,
            DownloadStatus::Downloading,
            DownloadStatus::Paused,
            DownloadStatus::Completed,
            DownloadStatus::Error,
            DownloadStatus::Cancelled,
        ] {
            assert_eq!(DownloadStatus::from_str(s.as_str()), s);
        }
    }

    #[test]
    fn part_progress_bounds() {
        let part = DownloadPart::new(0, 100, 199);
        assert_eq!(part.len(), 100);
        assert_eq!(part.downloaded_bytes, 0);
    }

    #[test]
    fn scheduled_check() {
        let mut task = DownloadTask::new("https://example.com/a.bin", None, None);
        let now = unix_now();
        assert!(!task.is_scheduled(now));
        task.scheduled_time = Some(now + 60.0);
        assert!(task.is_scheduled(now));
        task.scheduled_time = Some(now - 60.0);
        assert!(!task.is_scheduled(now));
    }
}

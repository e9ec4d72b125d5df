//! Transfer planning: worker count and part reuse on resume.

use crate::task::DownloadTask;

const MIB: u64 = 1024 * 1024;

/// Number of workers for a transfer: one per MiB up to the configured cap,
/// but only when the server supports ranges and the file clears 1 MiB.
pub(super) fn choose_worker_count(supports_range: bool, file_size: u64, max_workers: usize) -> usize {
    if supports_range && file_size > MIB {
        let by_size = (file_size / MIB).max(1) as usize;
        by_size.min(max_workers.max(1))
    } else {
        1
    }
}

/// True when the task's persisted parts still tile the probed size and can
/// drive a resume. A stale plan (size changed, no parts yet) is replanned.
pub(super) fn parts_are_resumable(task: &DownloadTask) -> bool {
    if task.parts.is_empty() {
        return false;
    }
    if task.file_size == 0 {
        // Unknown size: only a single open-ended part makes sense.
        return task.parts.len() == 1;
    }
    let mut expected_start = 0u64;
    for (i, part) in task.parts.iter().enumerate() {
        if part.part_number != i as u32 || part.start_byte != expected_start {
            return false;
        }
        if part.end_byte < part.start_byte {
            return false;
        }
        expected_start = part.end_byte + 1;
    }
    expected_start == task.file_size
}

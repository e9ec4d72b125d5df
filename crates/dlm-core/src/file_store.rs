//! Disk side of a download: part files, merge, verification, space checks.
//!
//! Part files live in `<tempdir>/DownloadManager/` as
//! `<task_id>_part_<n>.tmp`. Every append is fsynced, so after a crash the
//! size of a part file is the authoritative resume offset.

use crate::checksum::{hash_file, ChecksumAlgorithm};
use crate::config::Settings;
use crate::error::DownloadError;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Name of the shared temp subdirectory for part files.
const TEMP_DIR_NAME: &str = "DownloadManager";

pub struct FileStore {
    temp_dir: PathBuf,
    settings: Arc<Settings>,
}

impl FileStore {
    /// Creates the store, ensuring the temp directory exists.
    pub fn new(settings: Arc<Settings>) -> Result<Self, DownloadError> {
        let temp_dir = std::env::temp_dir().join(TEMP_DIR_NAME);
        fs::create_dir_all(&temp_dir)?;
        Ok(Self { temp_dir, settings })
    }

    /// Store rooted at an explicit temp directory (tests).
    pub fn with_temp_dir(temp_dir: PathBuf, settings: Arc<Settings>) -> Result<Self, DownloadError> {
        fs::create_dir_all(&temp_dir)?;
        Ok(Self { temp_dir, settings })
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn part_path(&self, task_id: &str, part_number: u32) -> PathBuf {
        self.temp_dir
            .join(format!("{}_part_{}.tmp", task_id, part_number))
    }

    /// Create an empty part file (left untouched if it already exists, so a
    /// resumed task keeps its progress).
    pub fn create_part_file(&self, task_id: &str, part_number: u32) -> Result<PathBuf, DownloadError> {
        let path = self.part_path(task_id, part_number);
        OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(path)
    }

    /// Append `data` to a part file and fsync it.
    pub fn append(&self, path: &Path, data: &[u8]) -> Result<(), DownloadError> {
        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    /// Open a part file once for a worker's streaming appends.
    pub fn open_part(&self, path: &Path) -> Result<PartFile, DownloadError> {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(PartFile { file })
    }

    /// Size of a part file on disk; 0 when missing.
    pub fn part_size(&self, path: &Path) -> u64 {
        fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    /// Stream part files, in order, into `dir/filename`.
    ///
    /// Creates the destination directory. A name collision is resolved by
    /// appending `" (k)"` before the extension, k starting at 1. Returns the
    /// actual final path so the caller can update the task record.
    pub fn merge(
        &self,
        parts_in_order: &[PathBuf],
        dir: &Path,
        filename: &str,
    ) -> Result<PathBuf, DownloadError> {
        fs::create_dir_all(dir)?;
        let final_path = resolve_collision(&dir.join(filename));

        let mut output = File::create(&final_path)?;
        for part in parts_in_order {
            let mut reader = BufReader::new(File::open(part)?);
            std::io::copy(&mut reader, &mut output)?;
        }
        output.sync_all()?;
        Ok(final_path)
    }

    /// Verify a merged file: exact size, then optional checksum.
    pub fn verify(
        &self,
        path: &Path,
        expected_size: u64,
        expected_checksum: Option<&str>,
        algorithm: ChecksumAlgorithm,
    ) -> Result<(), DownloadError> {
        let actual = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if actual != expected_size {
            return Err(DownloadError::Integrity(format!(
                "size mismatch: expected {} bytes, found {}",
                expected_size, actual
            )));
        }
        if let Some(expected) = expected_checksum {
            let digest = hash_file(path, algorithm)
                .map_err(|e| DownloadError::Integrity(e.to_string()))?;
            if !digest.eq_ignore_ascii_case(expected) {
                return Err(DownloadError::Integrity(format!(
                    "checksum mismatch: expected {}, computed {}",
                    expected, digest
                )));
            }
        }
        Ok(())
    }

    /// Free bytes on the filesystem containing `path`.
    #[cfg(unix)]
    pub fn free_space(&self, path: &Path) -> u64 {
        use std::os::unix::ffi::OsStrExt;
        let probe = nearest_existing_dir(path);
        let c_path = match std::ffi::CString::new(probe.as_os_str().as_bytes()) {
            Ok(p) => p,
            Err(_) => return 0,
        };
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return 0;
        }
        stat.f_frsize as u64 * stat.f_bavail as u64
    }

    /// No reliable probe off Unix; report unlimited so downloads proceed.
    #[cfg(not(unix))]
    pub fn free_space(&self, _path: &Path) -> u64 {
        u64::MAX
    }

    /// True when `required` bytes plus a 10% safety buffer fit on disk.
    pub fn has_space(&self, path: &Path, required: u64) -> bool {
        let with_buffer = required.saturating_add(required / 10);
        self.free_space(path) >= with_buffer
    }

    /// Best-effort removal; missing files are not an error.
    pub fn cleanup(&self, paths: &[PathBuf]) {
        for path in paths {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to remove temp file: {}", e);
                }
            }
        }
    }

    /// Remove `*.tmp` part files older than `max_age_hours`. Called at startup.
    pub fn gc_old_parts(&self, max_age_hours: u64) -> usize {
        let cutoff = Duration::from_secs(max_age_hours * 3600);
        let now = SystemTime::now();
        let mut removed = 0;

        let entries = match fs::read_dir(&self.temp_dir) {
            Ok(e) => e,
            Err(_) => return 0,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "tmp") != Some(true) {
                continue;
            }
            let modified = entry.metadata().and_then(|m| m.modified());
            let age = modified.ok().and_then(|m| now.duration_since(m).ok());
            if matches!(age, Some(a) if a > cutoff) && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "removed stale part files");
        }
        removed
    }

    /// Destination directory for `filename` when the task has none: the
    /// category subdirectory if auto-organize is on, else the download dir.
    pub fn category_dir(&self, filename: &str) -> PathBuf {
        let base = self.settings.download_directory.clone();
        if !self.settings.auto_organize_files {
            return base;
        }
        let ext = match Path::new(filename).extension() {
            Some(e) => format!(".{}", e.to_string_lossy().to_lowercase()),
            None => return base,
        };
        for (category, extensions) in &self.settings.file_categories {
            if extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
                return base.join(category);
            }
        }
        base
    }
}

/// A part file held open by one worker; appends are fsynced per chunk so the
/// on-disk size is always a safe resume offset.
pub struct PartFile {
    file: File,
}

impl PartFile {
    pub fn append(&mut self, data: &[u8]) -> Result<(), DownloadError> {
        self.file.write_all(data)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Discard existing content (restart of a non-resumable transfer).
    pub fn truncate(&mut self) -> Result<(), DownloadError> {
        self.file.set_len(0)?;
        Ok(())
    }
}

/// First non-colliding variant of `path`: `name.ext`, `name (1).ext`, ...
fn resolve_collision(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut k = 1u32;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, k, ext));
        if !candidate.exists() {
            return candidate;
        }
        k += 1;
    }
}

fn nearest_existing_dir(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    while !current.exists() {
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return PathBuf::from("/"),
        }
    }
    current
}

//! Error taxonomy for the download pipeline.
//!
//! Classification drives recovery: transient transport failures are retried
//! at task granularity, fatal conditions (disk, space, bad input) are not.

use thiserror::Error;

/// Errors surfaced by the manager, engine, and their collaborators.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The URL failed validation; no task is created.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The URL is already tracked by a task that is neither completed nor cancelled.
    #[error("URL already exists in downloads: {0}")]
    DuplicateUrl(String),

    /// Transport-level failure (DNS, connect, reset, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// Server replied with a 4xx/5xx status.
    #[error("server returned HTTP {0}")]
    Server(u32),

    /// A ranged request came back 416: the requested range is already satisfied.
    #[error("requested range already satisfied")]
    RangeAlreadySatisfied,

    /// Disk write failure (full disk, permissions). Not retried.
    #[error("disk error: {0}")]
    Disk(#[from] std::io::Error),

    /// The merged file failed size or checksum verification.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Not enough free space at the destination (10% safety buffer applied).
    #[error("insufficient disk space: need {required} bytes, {available} available")]
    InsufficientSpace { required: u64, available: u64 },

    /// Database failure. Logged and surfaced on the next operation.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The transfer was stopped by pause or cancel. Terminal, not an error to the user.
    #[error("cancelled")]
    Cancelled,
}

impl DownloadError {
    /// True if a task that failed with this error may re-enter the queue
    /// (budget permitting). Parts resume from their temp-file sizes, so a
    /// whole-task retry does not refetch completed ranges.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_) => true,
            DownloadError::Server(code) => *code >= 500 || *code == 429 || *code == 408,
            DownloadError::Integrity(_) => true,
            DownloadError::InvalidUrl(_)
            | DownloadError::DuplicateUrl(_)
            | DownloadError::RangeAlreadySatisfied
            | DownloadError::Disk(_)
            | DownloadError::InsufficientSpace { .. }
            | DownloadError::Persistence(_)
            | DownloadError::Cancelled => false,
        }
    }
}

impl From<sqlx::Error> for DownloadError {
    fn from(e: sqlx::Error) -> Self {
        DownloadError::Persistence(e.to_string())
    }
}

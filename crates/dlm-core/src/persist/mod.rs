//! Durable task + part state (SQLite via sqlx).
//!
//! Tasks and their parts survive restarts: status transitions are flushed
//! immediately, in-flight progress at most every few seconds, and after a
//! crash each part's temp-file size (not the persisted counter) is the
//! authoritative resume offset.

mod db;
mod read;
mod write;

#[cfg(test)]
mod tests;

pub use db::Database;
pub use read::DownloadStats;

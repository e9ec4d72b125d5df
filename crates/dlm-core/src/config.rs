use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/dlm/settings.json`.
///
/// A `Settings` value is an immutable snapshot: it is loaded once and passed
/// into each component at construction. Components never re-read the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Default destination directory for completed downloads.
    #[serde(default = "default_download_directory")]
    pub download_directory: PathBuf,
    /// Global cap on tasks in the Downloading state.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
    /// Upper bound on the number of parallel workers per task.
    #[serde(default = "default_max_threads_per_download")]
    pub max_threads_per_download: usize,
    /// HTTP read-chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Per-task retry budget.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Seconds between retries of the same task.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Process-wide download rate cap in KiB/s. 0 disables the limiter.
    #[serde(default)]
    pub bandwidth_limit: u64,
    /// Route completed files into category subdirectories by extension.
    #[serde(default)]
    pub auto_organize_files: bool,
    /// Category name -> list of extensions (with leading dot).
    #[serde(default = "default_file_categories")]
    pub file_categories: HashMap<String, Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_directory: default_download_directory(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            max_threads_per_download: default_max_threads_per_download(),
            chunk_size: default_chunk_size(),
            connection_timeout: default_connection_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            bandwidth_limit: 0,
            auto_organize_files: false,
            file_categories: default_file_categories(),
        }
    }
}

fn default_download_directory() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Downloads")
}

fn default_max_concurrent_downloads() -> usize {
    3
}

fn default_max_threads_per_download() -> usize {
    8
}

fn default_chunk_size() -> usize {
    8192
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_file_categories() -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    let mut insert = |cat: &str, exts: &[&str]| {
        map.insert(
            cat.to_string(),
            exts.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        );
    };
    insert("Videos", &[".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm"]);
    insert("Audio", &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".wma"]);
    insert("Images", &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp"]);
    insert("Documents", &[".pdf", ".doc", ".docx", ".txt", ".rtf", ".odt"]);
    insert("Archives", &[".zip", ".rar", ".7z", ".tar", ".gz", ".bz2"]);
    insert("Executables", &[".exe", ".msi", ".deb", ".rpm", ".dmg", ".pkg"]);
    map
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dlm")?;
    Ok(xdg_dirs.place_config_file("settings.json")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<Settings> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = Settings::default();
        let json = serde_json::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, json)?;
        tracing::info!("created default settings at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: Settings = serde_json::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_values() {
        let cfg = Settings::default();
        assert_eq!(cfg.max_concurrent_downloads, 3);
        assert_eq!(cfg.max_threads_per_download, 8);
        assert_eq!(cfg.chunk_size, 8192);
        assert_eq!(cfg.connection_timeout, 30);
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.retry_delay, 5);
        assert_eq!(cfg.bandwidth_limit, 0);
        assert!(!cfg.auto_organize_files);
        assert!(cfg.file_categories.contains_key("Archives"));
    }

    #[test]
    fn settings_json_roundtrip() {
        let cfg = Settings::default();
        let json = serde_json::to_string_pretty(&cfg).unwrap();
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.max_concurrent_downloads, cfg.max_concurrent_downloads);
        assert_eq!(parsed.chunk_size, cfg.chunk_size);
        assert_eq!(parsed.download_directory, cfg.download_directory);
    }

    #[test]
    fn settings_json_partial_uses_defaults() {
        let json = r#"{ "max_concurrent_downloads": 1, "bandwidth_limit": 512 }"#;
        let cfg: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.max_concurrent_downloads, 1);
        assert_eq!(cfg.bandwidth_limit, 512);
        assert_eq!(cfg.max_threads_per_download, 8);
        assert_eq!(cfg.retry_attempts, 3);
    }

    #[test]
    fn settings_json_unknown_key_rejected() {
        let json = r#"{ "max_concurrent_downloads": 2, "no_such_key": true }"#;
        assert!(serde_json::from_str::<Settings>(json).is_err());
    }
}

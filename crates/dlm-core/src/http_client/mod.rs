//! HTTP side of a download: HEAD probe, reachability test, and streaming
//! ranged/full GETs.
//!
//! Uses the curl crate (libcurl). Handles are checked out of a pool and
//! reused across requests, which keeps libcurl's per-handle connection cache
//! warm — workers of the same task get connection reuse for free.

mod limiter;
mod parse;
mod pool;

pub use limiter::RateLimiter;

use crate::config::Settings;
use crate::error::DownloadError;
use crate::filename;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pool::HandlePool;

/// Result of a HEAD probe: everything the engine needs to plan a transfer.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// URL after following redirects.
    pub final_url: String,
    /// Total size from `Content-Length`, if the server sent one.
    pub file_size: Option<u64>,
    /// True iff the server advertised `Accept-Ranges: bytes`.
    pub supports_range: bool,
    pub content_type: Option<String>,
    /// Server-suggested filename (Content-Disposition, else URL path).
    pub filename_hint: Option<String>,
    /// Headers of the final response.
    pub headers: HashMap<String, String>,
    pub status_code: u32,
}

pub struct HttpClient {
    pool: HandlePool,
    limiter: Arc<RateLimiter>,
    user_agent: String,
    timeout: Duration,
    chunk_size: usize,
}

impl HttpClient {
    pub fn new(settings: &Settings) -> Self {
        // Pool cap: enough handles for every worker of every concurrent task.
        let cap = settings
            .max_threads_per_download
            .saturating_mul(settings.max_concurrent_downloads)
            .max(1);
        Self {
            pool: HandlePool::new(cap),
            limiter: Arc::new(RateLimiter::new(settings.bandwidth_limit * 1024)),
            user_agent: format!("dlm/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(settings.connection_timeout),
            chunk_size: settings.chunk_size,
        }
    }

    /// HEAD request with redirects followed.
    ///
    /// Fails with `Network` on transport errors and `Server` on 4xx/5xx.
    pub fn probe(&self, url: &str) -> Result<FileInfo, DownloadError> {
        let mut easy = self.pool.checkout();
        let result = self.do_probe(&mut easy, url);
        self.pool.checkin(easy);
        result
    }

    fn do_probe(&self, easy: &mut curl::easy::Easy, url: &str) -> Result<FileInfo, DownloadError> {
        easy.url(url)
            .map_err(|e| DownloadError::InvalidUrl(e.to_string()))?;
        easy.nobody(true).map_err(curl_err)?;
        easy.follow_location(true).map_err(curl_err)?;
        easy.max_redirections(10).map_err(curl_err)?;
        easy.useragent(&self.user_agent).map_err(curl_err)?;
        easy.connect_timeout(self.timeout).map_err(curl_err)?;
        easy.timeout(self.timeout).map_err(curl_err)?;

        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let lines = Arc::clone(&lines);
            let mut transfer = easy.transfer();
            transfer
                .header_function(move |data| {
                    if let Ok(s) = std::str::from_utf8(data) {
                        lines.lock().unwrap().push(s.trim_end().to_string());
                    }
                    true
                })
                .map_err(curl_err)?;
            transfer
                .perform()
                .map_err(|e| DownloadError::Network(e.to_string()))?;
        }

        let status_code = easy.response_code().map_err(curl_err)?;
        if status_code >= 400 {
            return Err(DownloadError::Server(status_code));
        }
        let final_url = easy
            .effective_url()
            .ok()
            .flatten()
            .unwrap_or(url)
            .to_string();

        let lines = lines.lock().unwrap();
        let parsed = parse::parse_response_headers(&lines);
        let filename_hint =
            filename::filename_hint(parsed.content_disposition.as_deref(), &final_url);

        Ok(FileInfo {
            final_url,
            file_size: parsed.content_length,
            supports_range: parsed.accept_ranges,
            content_type: parsed.content_type,
            filename_hint,
            headers: parsed.headers,
            status_code,
        })
    }

    /// True when the URL answers a HEAD with a non-error status.
    pub fn test_reachable(&self, url: &str) -> bool {
        match self.probe(url) {
            Ok(_) => true,
            Err(DownloadError::Server(code)) => code < 400,
            Err(_) => false,
        }
    }

    /// Ranged GET streaming the body through `on_bytes` per received chunk.
    ///
    /// Requires a 206 response; a 200 is accepted only when `covers_whole`
    /// (the caller knows whether `[start, end]` spans the entire resource).
    /// A 416 maps to `RangeAlreadySatisfied` so callers can mark the part
    /// complete. The abort flag is observed between chunks.
    pub fn fetch_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
        covers_whole: bool,
        abort: &Arc<AtomicBool>,
        on_bytes: &mut dyn FnMut(&[u8]) -> Result<(), DownloadError>,
    ) -> Result<(), DownloadError> {
        self.stream_get(url, Some((start, end)), covers_whole, abort, on_bytes)
    }

    /// Full-content GET, streamed the same way.
    pub fn fetch_full(
        &self,
        url: &str,
        abort: &Arc<AtomicBool>,
        on_bytes: &mut dyn FnMut(&[u8]) -> Result<(), DownloadError>,
    ) -> Result<(), DownloadError> {
        self.stream_get(url, None, true, abort, on_bytes)
    }

    fn stream_get(
        &self,
        url: &str,
        range: Option<(u64, u64)>,
        covers_whole: bool,
        abort: &Arc<AtomicBool>,
        on_bytes: &mut dyn FnMut(&[u8]) -> Result<(), DownloadError>,
    ) -> Result<(), DownloadError> {
        let mut easy = self.pool.checkout();
        let result = self.do_stream_get(&mut easy, url, range, covers_whole, abort, on_bytes);
        self.pool.checkin(easy);
        result
    }

    fn do_stream_get(
        &self,
        easy: &mut curl::easy::Easy,
        url: &str,
        range: Option<(u64, u64)>,
        covers_whole: bool,
        abort: &Arc<AtomicBool>,
        on_bytes: &mut dyn FnMut(&[u8]) -> Result<(), DownloadError>,
    ) -> Result<(), DownloadError> {
        easy.url(url)
            .map_err(|e| DownloadError::InvalidUrl(e.to_string()))?;
        easy.follow_location(true).map_err(curl_err)?;
        easy.max_redirections(10).map_err(curl_err)?;
        easy.useragent(&self.user_agent).map_err(curl_err)?;
        easy.connect_timeout(self.timeout).map_err(curl_err)?;
        // Abort when throughput drops below 1 KiB/s for 60s rather than a hard
        // wall-clock deadline, which would kill large parts on slow links.
        easy.low_speed_limit(1024).map_err(curl_err)?;
        easy.low_speed_time(Duration::from_secs(60)).map_err(curl_err)?;
        easy.buffer_size(self.chunk_size).map_err(curl_err)?;

        if let Some((start, end)) = range {
            easy.range(&format!("{}-{}", start, end)).map_err(curl_err)?;
        }

        // Response code as soon as the status line arrives, so the body
        // callback can reject a 200 that ignored our Range header before any
        // byte reaches the part file.
        let status = Arc::new(AtomicU32::new(0));
        let callback_error: Arc<Mutex<Option<DownloadError>>> = Arc::new(Mutex::new(None));
        let ranged = range.is_some();

        {
            let status_in_header = Arc::clone(&status);
            let status_in_body = Arc::clone(&status);
            let error_slot = Arc::clone(&callback_error);
            let abort = Arc::clone(abort);
            let limiter = Arc::clone(&self.limiter);

            let mut transfer = easy.transfer();
            transfer
                .header_function(move |data| {
                    if let Some(code) = parse::parse_status_line(data) {
                        status_in_header.store(code, Ordering::Relaxed);
                    }
                    true
                })
                .map_err(curl_err)?;
            transfer
                .write_function(move |data| {
                    if abort.load(Ordering::Relaxed) {
                        let _ = error_slot.lock().unwrap().replace(DownloadError::Cancelled);
                        return Ok(0);
                    }
                    let code = status_in_body.load(Ordering::Relaxed);
                    if ranged && code == 200 && !covers_whole {
                        let _ = error_slot.lock().unwrap().replace(DownloadError::Network(
                            "server ignored Range header and returned 200".to_string(),
                        ));
                        return Ok(0);
                    }
                    if code != 200 && code != 206 {
                        // Error body; discard it, the status is handled after perform.
                        return Ok(data.len());
                    }
                    limiter.acquire(data.len() as u64);
                    match on_bytes(data) {
                        Ok(()) => Ok(data.len()),
                        Err(e) => {
                            let _ = error_slot.lock().unwrap().replace(e);
                            Ok(0)
                        }
                    }
                })
                .map_err(curl_err)?;

            if let Err(e) = transfer.perform() {
                if e.is_write_error() {
                    if let Some(err) = callback_error.lock().unwrap().take() {
                        return Err(err);
                    }
                }
                return Err(DownloadError::Network(e.to_string()));
            }
        }

        let code = easy.response_code().map_err(curl_err)?;
        match code {
            206 => Ok(()),
            200 if covers_whole => Ok(()),
            200 => Err(DownloadError::Network(
                "server ignored Range header and returned 200".to_string(),
            )),
            416 => Err(DownloadError::RangeAlreadySatisfied),
            _ => Err(DownloadError::Server(code)),
        }
    }
}

fn curl_err(e: curl::Error) -> DownloadError {
    DownloadError::Network(e.to_string())
}

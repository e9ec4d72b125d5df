//! Pool of reusable curl Easy handles.
//!
//! `curl_easy_reset` clears options but keeps the handle's live connections,
//! DNS cache, and session cache, so checking handles back in gives workers
//! connection reuse without sharing state across threads.

use std::sync::Mutex;

pub(super) struct HandlePool {
    handles: Mutex<Vec<curl::easy::Easy>>,
    cap: usize,
}

impl HandlePool {
    pub(super) fn new(cap: usize) -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            cap,
        }
    }

    /// Take a handle from the pool, or create a fresh one when empty.
    pub(super) fn checkout(&self) -> curl::easy::Easy {
        self.handles
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(curl::easy::Easy::new)
    }

    /// Return a handle. Options are reset; idle handles above the cap are
    /// dropped, which closes their pooled connections.
    pub(super) fn checkin(&self, mut easy: curl::easy::Easy) {
        easy.reset();
        let mut handles = self.handles.lock().unwrap();
        if handles.len() < self.cap {
            handles.push(easy);
        }
    }

    #[cfg(test)]
    pub(super) fn idle(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

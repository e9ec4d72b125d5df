//! Process-wide token-bucket bandwidth limiter.
//!
//! One bucket is shared by every worker of every task. A worker acquires
//! tokens for each received chunk; when the bucket runs dry the acquire
//! blocks until the debt is paid off at the configured rate.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    /// Bytes per second; 0 disables the limiter entirely.
    rate: u64,
    state: Mutex<Bucket>,
}

struct Bucket {
    /// May go negative: a chunk larger than the remaining tokens is admitted
    /// immediately and the overdraft is slept off before the next chunk.
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        Self {
            rate: rate_bytes_per_sec,
            state: Mutex::new(Bucket {
                tokens: rate_bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.rate > 0
    }

    /// Consume `n` tokens, sleeping until the bucket allows it.
    pub fn acquire(&self, n: u64) {
        if self.rate == 0 {
            return;
        }
        let wait = {
            let mut bucket = self.state.lock().unwrap();
            let now = Instant::now();
            let refill = now.duration_since(bucket.last_refill).as_secs_f64() * self.rate as f64;
            bucket.last_refill = now;
            // Burst capacity is one second of rate.
            bucket.tokens = (bucket.tokens + refill).min(self.rate as f64);
            bucket.tokens -= n as f64;
            if bucket.tokens < 0.0 {
                Duration::from_secs_f64(-bucket.tokens / self.rate as f64)
            } else {
                Duration::ZERO
            }
        };
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}

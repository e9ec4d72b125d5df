//! Minimal HTTP/1.1 server supporting HEAD and Range GET for integration
//! tests.
//!
//! Serves a single static body from a background thread. Behaviour is
//! configurable (HEAD blocked, ranges unsupported, throttled body,
//! Content-Disposition) and every request is recorded so tests can assert on
//! methods and Range headers.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405 (simulates servers that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` even if ranges work.
    pub advertise_ranges: bool,
    /// Body bytes per second per connection; None = unthrottled.
    pub throttle_bytes_per_sec: Option<u64>,
    /// Optional Content-Disposition header value for every response.
    pub content_disposition: Option<String>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            advertise_ranges: true,
            throttle_bytes_per_sec: None,
            content_disposition: None,
        }
    }
}

/// One observed request.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub method: String,
    pub range: Option<(u64, u64)>,
}

/// Running server handle: base URL plus the request log.
pub struct RangeServer {
    pub url: String,
    requests: Arc<Mutex<Vec<RequestRecord>>>,
}

impl RangeServer {
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().unwrap().clone()
    }

    /// GET requests only (probes and reachability HEADs filtered out).
    pub fn get_requests(&self) -> Vec<RequestRecord> {
        self.requests()
            .into_iter()
            .filter(|r| r.method.eq_ignore_ascii_case("GET"))
            .collect()
    }
}

/// Starts a server serving `body` with default options.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

/// Starts a server with custom behaviour. Runs until the process exits.
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let requests: Arc<Mutex<Vec<RequestRecord>>> = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&requests);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = opts.clone();
            let log = Arc::clone(&log);
            thread::spawn(move || handle(stream, &body, &opts, &log));
        }
    });

    RangeServer {
        url: format!("http://127.0.0.1:{}/testfile.bin", port),
        requests,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: &RangeServerOptions,
    log: &Arc<Mutex<Vec<RequestRecord>>>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));

    loop {
        let request = match read_request(&mut stream) {
            Some(r) => r,
            None => return,
        };
        let (method, range) = parse_request(&request);
        log.lock().unwrap().push(RequestRecord {
            method: method.clone(),
            range,
        });

        let total = body.len() as u64;
        let extra = opts
            .content_disposition
            .as_ref()
            .map(|v| format!("Content-Disposition: {}\r\n", v))
            .unwrap_or_default();
        let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
            "Accept-Ranges: bytes\r\n"
        } else {
            ""
        };

        if method.eq_ignore_ascii_case("HEAD") {
            if !opts.head_allowed {
                let _ = stream
                    .write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
                continue;
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}{}\r\n",
                total, accept_ranges, extra
            );
            let _ = stream.write_all(response.as_bytes());
            continue;
        }

        if !method.eq_ignore_ascii_case("GET") {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            continue;
        }

        let effective_range = if opts.support_ranges { range } else { None };
        let (status, content_range, slice) = match effective_range {
            Some((start, end_incl)) => {
                let end_incl = end_incl.min(total.saturating_sub(1));
                if start >= total || start > end_incl {
                    let header = format!("Content-Range: bytes */{}\r\n", total);
                    let _ = stream.write_all(
                        format!(
                            "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\n{}\r\n",
                            header
                        )
                        .as_bytes(),
                    );
                    continue;
                }
                let slice = &body[start as usize..=end_incl as usize];
                (
                    "206 Partial Content",
                    format!("Content-Range: bytes {}-{}/{}\r\n", start, end_incl, total),
                    slice,
                )
            }
            None => ("200 OK", String::new(), body),
        };

        let header = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}{}{}\r\n",
            status,
            slice.len(),
            content_range,
            accept_ranges,
            extra
        );
        if stream.write_all(header.as_bytes()).is_err() {
            return;
        }
        if write_body(&mut stream, slice, opts.throttle_bytes_per_sec).is_err() {
            return;
        }
    }
}

fn write_body(
    stream: &mut std::net::TcpStream,
    body: &[u8],
    throttle: Option<u64>,
) -> std::io::Result<()> {
    match throttle {
        None => stream.write_all(body),
        Some(rate) => {
            const CHUNK: usize = 8 * 1024;
            let pause = Duration::from_secs_f64(CHUNK as f64 / rate as f64);
            for chunk in body.chunks(CHUNK) {
                stream.write_all(chunk)?;
                stream.flush()?;
                thread::sleep(pause);
            }
            Ok(())
        }
    }
}

fn read_request(stream: &mut std::net::TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    // Read until the blank line that ends the request head.
    while !buf.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(0) => return None,
            Ok(_) => buf.push(byte[0]),
            Err(_) => return None,
        }
        if buf.len() > 16 * 1024 {
            return None;
        }
    }
    String::from_utf8(buf).ok()
}

fn parse_request(request: &str) -> (String, Option<(u64, u64)>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("")
        .to_string();

    let mut range = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("range") {
            let value = value.trim();
            if let Some(spec) = value.strip_prefix("bytes=") {
                if let Some((s, e)) = spec.split_once('-') {
                    if let (Ok(start), Ok(end)) = (s.parse::<u64>(), e.parse::<u64>()) {
                        range = Some((start, end));
                    }
                }
            }
        }
    }
    (method, range)
}

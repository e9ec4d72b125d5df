//! Parse HTTP response header lines collected during a transfer.

use std::collections::HashMap;

/// Fields extracted from the final response's headers.
#[derive(Debug, Default)]
pub(super) struct ParsedHeaders {
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
    pub headers: HashMap<String, String>,
}

/// Parse collected header lines. A redirect chain delivers several responses;
/// each new status line resets the state so only the final response counts.
pub(super) fn parse_response_headers(lines: &[String]) -> ParsedHeaders {
    let mut out = ParsedHeaders::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            out = ParsedHeaders::default();
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            out.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            out.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("content-type") {
            out.content_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-disposition") {
            out.content_disposition = Some(value.to_string());
        }
        out.headers.insert(name.to_ascii_lowercase(), value.to_string());
    }

    out
}

/// Extract the status code from a raw `HTTP/x.y CODE ...` status line.
pub(super) fn parse_status_line(data: &[u8]) -> Option<u32> {
    let line = std::str::from_utf8(data).ok()?;
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_length_and_ranges() {
        let lines = [
            "HTTP/1.1 200 OK".to_string(),
            "Content-Length: 12345".to_string(),
            "Accept-Ranges: bytes".to_string(),
            "Content-Type: application/octet-stream".to_string(),
        ];
        let r = parse_response_headers(&lines);
        assert_eq!(r.content_length, Some(12345));
        assert!(r.accept_ranges);
        assert_eq!(r.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(r.headers.get("content-length").map(String::as_str), Some("12345"));
    }

    #[test]
    fn redirect_resets_to_final_response() {
        let lines = [
            "HTTP/1.1 302 Found".to_string(),
            "Location: /elsewhere".to_string(),
            "Content-Length: 0".to_string(),
            "HTTP/1.1 200 OK".to_string(),
            "Content-Length: 999".to_string(),
        ];
        let r = parse_response_headers(&lines);
        assert_eq!(r.content_length, Some(999));
        assert!(!r.headers.contains_key("location"));
    }

    #[test]
    fn accept_ranges_none_is_unsupported() {
        let lines = [
            "Content-Length: 999".to_string(),
            "Accept-Ranges: none".to_string(),
        ];
        let r = parse_response_headers(&lines);
        assert!(!r.accept_ranges);
    }

    #[test]
    fn content_disposition_captured() {
        let lines = ["Content-Disposition: attachment; filename=\"report.pdf\"".to_string()];
        let r = parse_response_headers(&lines);
        assert!(r.content_disposition.as_deref().unwrap().contains("report.pdf"));
    }

    #[test]
    fn status_line_parsing() {
        assert_eq!(parse_status_line(b"HTTP/1.1 206 Partial Content\r\n"), Some(206));
        assert_eq!(parse_status_line(b"HTTP/2 200\r\n"), Some(200));
        assert_eq!(parse_status_line(b"Content-Length: 5\r\n"), None);
    }
}

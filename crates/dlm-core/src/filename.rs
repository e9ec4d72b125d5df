//! Server-suggested filename extraction and sanitization.
//!
//! A probe derives the filename hint from `Content-Disposition` when present
//! (RFC 6266 quoted-string and token forms, RFC 5987 `filename*`), otherwise
//! from the final URL's last path segment.

/// Best filename hint for a response: Content-Disposition first, URL fallback.
/// The result is sanitized for safe use as a local file name.
pub fn filename_hint(content_disposition: Option<&str>, final_url: &str) -> Option<String> {
    let raw = content_disposition
        .and_then(from_content_disposition)
        .or_else(|| from_url(final_url))?;
    let clean = sanitize(&raw);
    if clean.is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Extracts the filename from a `Content-Disposition` header value.
///
/// `filename*=UTF-8''...` (percent-encoded) takes precedence over plain
/// `filename=` in both quoted and token forms.
pub fn from_content_disposition(value: &str) -> Option<String> {
    let mut plain: Option<String> = None;

    for param in value.split(';') {
        let (name, val) = match param.split_once('=') {
            Some(pair) => pair,
            None => continue,
        };
        let name = name.trim().to_ascii_lowercase();
        let val = val.trim();

        if name == "filename*" {
            let rest = val
                .strip_prefix("UTF-8''")
                .or_else(|| val.strip_prefix("utf-8''"));
            if let Some(rest) = rest {
                let decoded = percent_decode(rest);
                if !decoded.is_empty() {
                    return Some(decoded);
                }
            }
        } else if name == "filename" {
            let unquoted = if val.len() >= 2 && val.starts_with('"') && val.ends_with('"') {
                unescape_quoted(&val[1..val.len() - 1])
            } else {
                val.to_string()
            };
            if !unquoted.is_empty() {
                plain = Some(unquoted);
            }
        }
    }

    plain
}

/// Last path segment of the URL, percent-decoded, when it contains a dot.
pub fn from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = percent_decode(segment);
    if decoded.contains('.') {
        Some(decoded)
    } else {
        None
    }
}

/// Sanitizes a candidate filename:
/// path separators and control characters become `_`, leading/trailing
/// dots and spaces are trimmed, and the result is capped at 255 bytes.
pub fn sanitize(name: &str) -> String {
    const NAME_MAX: usize = 255;

    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '\0' || c == '/' || c == '\\' || c.is_control() {
            out.push('_');
        } else {
            out.push(c);
        }
    }

    let trimmed = out.trim_matches(|c| c == ' ' || c == '.');
    let mut result = trimmed.to_string();
    while result.len() > NAME_MAX {
        result.pop();
    }
    result
}

fn unescape_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('"' | '\\')) => out.push(next),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn percent_decode(input: &str) -> String {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.as_bytes().iter().copied();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let h = bytes.next().and_then(hex_digit);
            let l = bytes.next().and_then(hex_digit);
            match (h, l) {
                (Some(high), Some(low)) => out.push(high << 4 | low),
                _ => out.push(b'%'),
            }
        } else {
            out.push(b);
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

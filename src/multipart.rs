//! # Multipart Ingestor
//!
//! Minimal decoder for `multipart/form-data` request bodies: one or more
//! binary file parts plus a handful of text fields. This is deliberately not
//! a general MIME implementation: it handles exactly the framing browsers
//! and the bundled frontend produce, and nothing more.
//!
//! ## Contract:
//! - pure function of (body bytes, boundary token); no side effects
//! - the first part declaring a given field name wins; later duplicates are
//!   ignored (stop-on-first-match, a documented simplification)
//! - a part that declares a filename but carries an empty name or payload is
//!   a framing error, not a silent skip

use crate::error::{AppError, AppResult};
use std::collections::HashMap;

/// One decoded part of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Binary upload with its client-declared filename.
    File { filename: String, data: Vec<u8> },
    /// Plain text field, lossily decoded as UTF-8 and trimmed.
    Field(String),
}

/// Decoded multipart form, keyed by declared field name.
#[derive(Debug, Default)]
pub struct MultipartForm {
    parts: HashMap<String, Part>,
}

/// Extract the boundary token from a `Content-Type` header value.
///
/// Tolerates a boundary wrapped in one outer quote pair
/// (`boundary="----x"`).
pub fn boundary_from_content_type(content_type: &str) -> AppResult<String> {
    if !content_type.starts_with("multipart/form-data") {
        return Err(AppError::MalformedRequest(
            "expected multipart/form-data".to_string(),
        ));
    }

    let raw = content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("boundary="))
        .ok_or_else(|| {
            AppError::MalformedRequest("no boundary in content-type".to_string())
        })?;

    let boundary = raw.trim().trim_matches('"').to_string();
    if boundary.is_empty() {
        return Err(AppError::MalformedRequest("empty multipart boundary".to_string()));
    }
    Ok(boundary)
}

impl MultipartForm {
    /// Decode a raw body against the given boundary token.
    pub fn parse(body: &[u8], boundary: &str) -> AppResult<Self> {
        let boundary = boundary.trim().trim_matches('"');
        if boundary.is_empty() {
            return Err(AppError::MalformedRequest("empty multipart boundary".to_string()));
        }

        let delimiter = format!("--{}", boundary).into_bytes();
        let mut segments = split_on(body, &delimiter);
        if segments.len() < 2 {
            return Err(AppError::MalformedRequest(
                "boundary not present in request body".to_string(),
            ));
        }

        // First segment is the preamble, the last is the `--` epilogue.
        segments.remove(0);
        let mut parts = HashMap::new();

        for segment in segments {
            // The closing delimiter leaves a bare `--` segment behind.
            if segment.starts_with(b"--") {
                continue;
            }
            let segment = strip_leading_crlf(segment);
            if segment.len() < 4 {
                continue;
            }

            let (header_bytes, content) = match split_headers(segment) {
                Some(split) => split,
                None => continue,
            };

            let headers = String::from_utf8_lossy(header_bytes);
            let disposition = headers
                .lines()
                .map(str::trim)
                .find(|line| line.to_ascii_lowercase().starts_with("content-disposition:"));
            let disposition = match disposition {
                Some(d) if d.to_ascii_lowercase().contains("form-data") => d,
                _ => continue,
            };

            let name = match header_attr(disposition, "name") {
                Some(name) if !name.is_empty() => name,
                _ => continue,
            };

            // First occurrence wins.
            if parts.contains_key(&name) {
                continue;
            }

            let content = strip_trailing_crlf(content);

            if disposition.contains("filename=") {
                let filename = header_attr(disposition, "filename").unwrap_or_default();
                if filename.is_empty() {
                    return Err(AppError::MalformedRequest(format!(
                        "file part '{}' has no filename",
                        name
                    )));
                }
                if content.is_empty() {
                    return Err(AppError::MalformedRequest(format!(
                        "file part '{}' has no payload",
                        name
                    )));
                }
                parts.insert(
                    name,
                    Part::File {
                        filename,
                        data: content.to_vec(),
                    },
                );
            } else {
                let value = String::from_utf8_lossy(content).trim().to_string();
                parts.insert(name, Part::Field(value));
            }
        }

        Ok(Self { parts })
    }

    /// Get a file part by field name.
    pub fn file(&self, name: &str) -> Option<(&str, &[u8])> {
        match self.parts.get(name) {
            Some(Part::File { filename, data }) => Some((filename.as_str(), data.as_slice())),
            _ => None,
        }
    }

    /// Get a text field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        match self.parts.get(name) {
            Some(Part::Field(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Get a text field, falling back to a default when absent.
    pub fn field_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.field(name).unwrap_or(default)
    }

    /// Number of decoded parts (files + fields).
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Split `haystack` on every occurrence of `needle`.
fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if &haystack[i..i + needle.len()] == needle {
            segments.push(&haystack[start..i]);
            i += needle.len();
            start = i;
        } else {
            i += 1;
        }
    }
    segments.push(&haystack[start..]);
    segments
}

/// Split a part into (headers, content) at the blank line, tolerating
/// bare-LF framing from non-conforming clients.
fn split_headers(part: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(pos) = find(part, b"\r\n\r\n") {
        return Some((&part[..pos], &part[pos + 4..]));
    }
    if let Some(pos) = find(part, b"\n\n") {
        return Some((&part[..pos], &part[pos + 2..]));
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn strip_leading_crlf(bytes: &[u8]) -> &[u8] {
    let mut bytes = bytes;
    while bytes.starts_with(b"\r\n") {
        bytes = &bytes[2..];
    }
    while bytes.starts_with(b"\n") {
        bytes = &bytes[1..];
    }
    bytes
}

fn strip_trailing_crlf(bytes: &[u8]) -> &[u8] {
    if let Some(stripped) = bytes.strip_suffix(b"\r\n") {
        stripped
    } else if let Some(stripped) = bytes.strip_suffix(b"\n") {
        stripped
    } else {
        bytes
    }
}

/// Extract a quoted or unquoted attribute value from a header line,
/// e.g. `name="audio"` or `filename=recording.mp3`.
fn header_attr(header: &str, attr: &str) -> Option<String> {
    let marker = format!("{}=", attr);
    let mut search = header;
    loop {
        let pos = search.find(&marker)?;
        // Reject substring hits like `filename=` matching a `name=` search.
        let is_boundary = pos == 0
            || search[..pos]
                .chars()
                .next_back()
                .map_or(true, |c| c == ';' || c == ' ');
        let rest = &search[pos + marker.len()..];
        if !is_boundary {
            search = rest;
            continue;
        }
        return Some(if let Some(quoted) = rest.strip_prefix('"') {
            quoted.split('"').next().unwrap_or_default().to_string()
        } else {
            rest.split([';', ' ', '\r', '\n'])
                .next()
                .unwrap_or_default()
                .to_string()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY: &str = "----testboundary42";

    fn build_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match filename {
                Some(f) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, f
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    #[test]
    fn test_parse_file_and_fields() {
        let body = build_body(&[
            ("audio", Some("talk.mp3"), b"\x00\x01binary\xffdata"),
            ("model", None, b"tiny"),
            ("preview", None, b"true"),
        ]);

        let form = MultipartForm::parse(&body, BOUNDARY).unwrap();
        let (filename, data) = form.file("audio").unwrap();
        assert_eq!(filename, "talk.mp3");
        assert_eq!(data, b"\x00\x01binary\xffdata");
        assert_eq!(form.field("model"), Some("tiny"));
        assert_eq!(form.field("preview"), Some("true"));
        assert_eq!(form.field_or("language", "English"), "English");
    }

    #[test]
    fn test_first_occurrence_wins() {
        let body = build_body(&[
            ("model", None, b"tiny"),
            ("model", None, b"large"),
        ]);

        let form = MultipartForm::parse(&body, BOUNDARY).unwrap();
        assert_eq!(form.field("model"), Some("tiny"));
        assert_eq!(form.len(), 1);
    }

    #[test]
    fn test_quoted_boundary_is_tolerated() {
        let body = build_body(&[("model", None, b"base")]);
        let quoted = format!("\"{}\"", BOUNDARY);

        let form = MultipartForm::parse(&body, &quoted).unwrap();
        assert_eq!(form.field("model"), Some("base"));
    }

    #[test]
    fn test_missing_boundary_is_malformed() {
        let body = b"not a multipart body at all";
        let err = MultipartForm::parse(body, BOUNDARY).unwrap_err();
        assert_eq!(err.kind(), "malformed_request");
    }

    #[test]
    fn test_empty_file_payload_is_malformed() {
        let body = build_body(&[("audio", Some("x.mp3"), b"")]);
        let err = MultipartForm::parse(&body, BOUNDARY).unwrap_err();
        assert_eq!(err.kind(), "malformed_request");
    }

    #[test]
    fn test_binary_payload_preserves_crlf_bytes() {
        // Internal CRLF pairs inside a file payload must survive; only the
        // framing CRLF before the next delimiter is stripped.
        let payload = b"line1\r\nline2\r\n\r\nline3";
        let body = build_body(&[("audio", Some("a.wav"), payload)]);

        let form = MultipartForm::parse(&body, BOUNDARY).unwrap();
        let (_, data) = form.file("audio").unwrap();
        assert_eq!(data, payload);
    }

    #[test]
    fn test_boundary_from_content_type() {
        let ct = format!("multipart/form-data; boundary={}", BOUNDARY);
        assert_eq!(boundary_from_content_type(&ct).unwrap(), BOUNDARY);

        let quoted = format!("multipart/form-data; boundary=\"{}\"", BOUNDARY);
        assert_eq!(boundary_from_content_type(&quoted).unwrap(), BOUNDARY);

        assert!(boundary_from_content_type("multipart/form-data").is_err());
        assert!(boundary_from_content_type("application/json").is_err());
    }

    #[test]
    fn test_field_value_is_trimmed() {
        let body = build_body(&[("language", None, b"  English  ")]);
        let form = MultipartForm::parse(&body, BOUNDARY).unwrap();
        assert_eq!(form.field("language"), Some("English"));
    }
}

//! Response model and body helpers.
//!
//! Bodies are always read to completion by the client before a response is
//! handed out, so holding an `HttpResponse` never pins a pool connection.

use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;

use crate::errors::{Result, ScanError};

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Parsed `Set-Cookie` records, in header order.
    pub set_cookies: Vec<SetCookie>,
    pub body: Vec<u8>,
    /// Round-trip time including the full body read.
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
}

impl HttpResponse {
    /// Body as UTF-8, lossy.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        // Header names are stored lowercased by the client.
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    /// Whether the content type is one of the text classes the analyzers
    /// operate on.
    pub fn is_text(&self) -> bool {
        const TEXT_TYPES: &[&str] = &[
            "text/html",
            "text/plain",
            "application/json",
            "application/xml",
            "application/javascript",
            "text/css",
        ];
        let ct = self.content_type().to_ascii_lowercase();
        TEXT_TYPES.iter().any(|t| ct.contains(t))
    }
}

/// Decode a response body according to its `Content-Encoding`.
///
/// Only gzip is understood; `br` and `deflate` are surfaced as transport
/// errors rather than silently passed through.
pub fn decode_body(content_encoding: Option<&str>, raw: Vec<u8>) -> Result<Vec<u8>> {
    let encoding = match content_encoding {
        Some(e) if !e.trim().is_empty() => e.trim().to_ascii_lowercase(),
        _ => return Ok(raw),
    };

    match encoding.as_str() {
        "identity" => Ok(raw),
        "gzip" | "x-gzip" => {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut decoded = Vec::new();
            decoder
                .read_to_end(&mut decoded)
                .map_err(|e| ScanError::Transport(format!("gzip decode failed: {e}")))?;
            Ok(decoded)
        }
        other => Err(ScanError::Transport(format!(
            "unsupported content encoding: {other}"
        ))),
    }
}

/// Parse a single `Set-Cookie` header value.
///
/// Attributes other than Domain and Path are not needed by the session
/// layer and are dropped.
pub fn parse_set_cookie(raw: &str) -> Option<SetCookie> {
    let mut parts = raw.split(';');
    let pair = parts.next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = SetCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: None,
        path: None,
    };

    for attr in parts {
        let attr = attr.trim();
        if let Some((key, val)) = attr.split_once('=') {
            match key.trim().to_ascii_lowercase().as_str() {
                "domain" => cookie.domain = Some(val.trim().trim_start_matches('.').to_string()),
                "path" => cookie.path = Some(val.trim().to_string()),
                _ => {}
            }
        }
    }

    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn gzip_body_is_decoded() {
        let compressed = gzip(b"<html>hello</html>");
        let decoded = decode_body(Some("gzip"), compressed).unwrap();
        assert_eq!(decoded, b"<html>hello</html>");
    }

    #[test]
    fn claimed_gzip_plain_body_is_a_transport_error() {
        let err = decode_body(Some("gzip"), b"just plain text".to_vec()).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn unknown_encoding_is_a_transport_error() {
        let err = decode_body(Some("br"), b"x".to_vec()).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn missing_encoding_passes_through() {
        let body = decode_body(None, b"abc".to_vec()).unwrap();
        assert_eq!(body, b"abc");
    }

    #[test]
    fn set_cookie_with_attributes() {
        let c = parse_set_cookie("PHPSESSID=abc123; Path=/; Domain=.app.test; HttpOnly").unwrap();
        assert_eq!(c.name, "PHPSESSID");
        assert_eq!(c.value, "abc123");
        assert_eq!(c.domain.as_deref(), Some("app.test"));
        assert_eq!(c.path.as_deref(), Some("/"));
    }

    #[test]
    fn set_cookie_bare_pair() {
        let c = parse_set_cookie("token=xyz").unwrap();
        assert_eq!(c.name, "token");
        assert_eq!(c.value, "xyz");
        assert!(c.domain.is_none());
        assert!(c.path.is_none());
    }

    #[test]
    fn set_cookie_garbage_is_none() {
        assert!(parse_set_cookie("no-equals-sign").is_none());
        assert!(parse_set_cookie("=value-without-name").is_none());
    }

    #[test]
    fn content_type_classification() {
        let mut resp = HttpResponse {
            status: 200,
            headers: HashMap::new(),
            set_cookies: Vec::new(),
            body: Vec::new(),
            elapsed: Duration::from_millis(1),
        };
        resp.headers
            .insert("content-type".into(), "text/html; charset=utf-8".into());
        assert!(resp.is_text());

        resp.headers
            .insert("content-type".into(), "application/octet-stream".into());
        assert!(!resp.is_text());
    }
}

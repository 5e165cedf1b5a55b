//! HTTP request parsing for the broker's composition root.
//!
//! Unlike a typical JSON-API request parser, this one never interprets the
//! body: DICOMweb STOW bodies are `multipart/related` binary payloads, and
//! reshaping them even by round-tripping through a JSON `Value` would risk
//! corrupting the byte-for-byte boundary the upstream server expects (spec
//! §4.8, P9). The body is read once into a plain `Vec<u8>` and carried
//! through untouched.

use may_minihttp::Request;
use std::io::{self, Read};

/// Everything this crate needs from an inbound HTTP request: method, path
/// (including any query string), headers in original case, and the raw
/// request body.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ParsedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a `may_minihttp::Request` into a [`ParsedRequest`], reading the
/// body fully into memory. The host DICOM server forwards single
/// store/query requests, not long-lived streams, so buffering the body is
/// the same tradeoff `reqwest::blocking` already makes on the outbound side
/// (spec §5: upstream proxying is a suspension point, not a stream we hold
/// open indefinitely).
pub fn parse_request(req: Request) -> io::Result<ParsedRequest> {
    let method = req.method().to_string();
    let path = req.path().to_string();
    let headers = req
        .headers()
        .iter()
        .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).to_string()))
        .collect();

    let mut body = Vec::new();
    req.body().read_to_end(&mut body)?;

    Ok(ParsedRequest {
        method,
        path,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let parsed = ParsedRequest {
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Vec::new(),
        };
        assert_eq!(parsed.header("content-type"), Some("application/json"));
        assert_eq!(parsed.header("missing"), None);
    }
}

//! Response building for the broker's composition root (spec §6.2).
//!
//! Two shapes: the admin envelope (`write_envelope`/`write_error_envelope`)
//! used by the status/servers/test endpoints, and the raw passthrough used
//! by the DICOMweb proxy path, which must relay the upstream's headers and
//! body byte-for-byte rather than re-wrap them in JSON.

use may_minihttp::Response;
use serde_json::{json, Value};

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// The success envelope every admin endpoint returns (spec §6.2):
/// `{"plugin_version","api_version","timestamp","data":{...}}`.
pub fn write_envelope(res: &mut Response, status: u16, data: Value) {
    let body = json!({
        "plugin_version": env!("CARGO_PKG_VERSION"),
        "api_version": "2.0",
        "timestamp": crate::audit::iso8601_now(),
        "data": data,
    });
    write_json(res, status, &body);
}

/// The error envelope shared by admin endpoints and proxy failures
/// originating in this service (spec §6.2, §7).
pub fn write_error_envelope(res: &mut Response, status: u16, error: &str, error_type: &str) {
    write_envelope(
        res,
        status,
        json!({ "error": error, "error_type": error_type }),
    );
}

/// The `429` envelope (spec §6.2 "429 rate limited (with `max_requests`,
/// `window_seconds` in body)", S4): carries the limit and window as
/// structured fields rather than only inside the message string, so a
/// caller can back off programmatically without parsing prose.
pub fn write_rate_limit_envelope(res: &mut Response, error: &str, limit: u32, window_seconds: u64) {
    write_envelope(
        res,
        429,
        json!({
            "error": error,
            "error_type": "RateLimitExceeded",
            "max_requests": limit,
            "window_seconds": window_seconds,
        }),
    );
}

fn write_json(res: &mut Response, status: u16, body: &Value) {
    res.status_code(status as usize, status_reason(status));
    res.header("Content-Type: application/json");
    res.body_vec(serde_json::to_vec(body).unwrap_or_default());
}

/// Relay an upstream (or locally-produced raw) response verbatim: exact
/// status, exact headers, exact body bytes. Used by the DICOMweb proxy path
/// so a STOW multipart response is never reinterpreted (spec §4.8, P9).
pub fn write_raw(res: &mut Response, status: u16, headers: &[(String, String)], body: Vec<u8>) {
    res.status_code(status as usize, status_reason(status));
    for (name, value) in headers {
        res.header(&format!("{name}: {value}"));
    }
    res.body_vec(body);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reason_covers_used_codes() {
        assert_eq!(status_reason(429), "Too Many Requests");
        assert_eq!(status_reason(503), "Service Unavailable");
        assert_eq!(status_reason(200), "OK");
    }

}

//! Transparent DICOMweb proxy handler (spec §4.8).
//!
//! Forwards the host DICOM server's request to the configured upstream
//! verbatim: same method, same body bytes (critical for STOW's
//! `multipart/related` boundary, P9), `Authorization`/`Host` replaced,
//! every other header copied through. Upstream 4xx/5xx are relayed as-is —
//! this layer never retries (spec §4.8 "Idempotence").
//!
//! Known limitation (spec §9 open question, resolved in DESIGN.md): the
//! host's expected STOW success envelope may not match what some upstreams
//! return. We do not reshape it; successes are logged explicitly so an
//! operator can diagnose a downstream envelope mismatch.

use std::time::Duration;

/// Headers that must never be copied verbatim to the upstream request:
/// `Authorization` is replaced with the broker's bearer token, `Host` is
/// recomputed by the HTTP client from the target URL.
fn is_stripped_request_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == "authorization" || lower == "host"
}

/// Hop-by-hop headers (RFC 7230 §6.1) that must not be relayed from the
/// upstream response back to the caller.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Build the `reqwest::blocking::Client` used to forward requests to one
/// configured upstream, honoring that server's `VerifySSL` setting (spec §3
/// `ServerConfig.verify_ssl`) the same way provider token-acquisition
/// clients already do (`provider::generic::build_client`). A distinct
/// client per upstream is required here: relaxing certificate verification
/// for one self-signed-cert upstream must not weaken it for another
/// server's upstream sharing this process.
pub fn build_upstream_client(verify_ssl: bool, connect_timeout: Duration) -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(!verify_ssl)
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Forward one request to `{server_base_url}{remaining_path}` with a fresh
/// bearer token from `token_manager`, relaying the upstream response
/// verbatim.
pub fn forward_request(
    client: &reqwest::blocking::Client,
    server_base_url: &str,
    remaining_path: &str,
    method: &str,
    inbound_headers: &[(String, String)],
    body: Vec<u8>,
    token: &str,
    timeout: Duration,
) -> Result<ProxyResponse, reqwest::Error> {
    let url = format!(
        "{}{}",
        server_base_url.trim_end_matches('/'),
        remaining_path
    );

    let http_method = reqwest::Method::from_bytes(method.as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let mut builder = client.request(http_method, &url).timeout(timeout);
    for (name, value) in inbound_headers {
        if !is_stripped_request_header(name) {
            builder = builder.header(name, value);
        }
    }
    builder = builder.header("Authorization", format!("Bearer {token}"));

    let response = builder.body(body).send()?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter(|(name, _)| !is_hop_by_hop_header(name.as_str()))
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = response.bytes()?.to_vec();

    Ok(ProxyResponse {
        status,
        headers,
        body,
    })
}

/// Derive the client-identity key used by the rate limiter for both the
/// proxy path and the admin `/test` endpoint (spec §4.8, §11): the first
/// hop recorded in `X-Forwarded-For`, falling back to a fixed key when the
/// host server is talking to us directly over a loopback/unix-socket
/// connection with no forwarding header.
pub fn client_identity(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("x-forwarded-for"))
        .and_then(|(_, value)| value.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "direct".to_string())
}

/// Given a path like `/oauth-dicom-web/servers/s1/studies`, split into the
/// server name and the remaining path (with leading slash) to append to
/// the server's base URL, e.g. `("s1", "/studies")`.
pub fn split_proxy_path(path: &str) -> Option<(&str, String)> {
    let rest = path.strip_prefix("/oauth-dicom-web/servers/")?;
    let (name, remaining) = rest.split_once('/').unwrap_or((rest, ""));
    if name.is_empty() {
        return None;
    }
    let remaining = if remaining.is_empty() {
        String::new()
    } else {
        format!("/{remaining}")
    };
    Some((name, remaining))
}

pub fn log_stow_success(server: &str, status: u16, content_length: usize) {
    tracing::info!(
        server = server,
        status = status,
        content_length = content_length,
        "proxied upstream response"
    );
}

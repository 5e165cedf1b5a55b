//! Full-stack integration coverage for the composition root (spec §6.2):
//! boots a real `AppService` behind `HttpServer` and drives it over raw
//! TCP, the way the host DICOM server itself would, against a mocked IdP
//! and a mocked upstream DICOMweb server.

use dicomweb_oauth_broker::config::{
    CircuitBreakerConfig, GlobalConfig, LogLevel, ProviderType, RetryConfig, ServerConfig,
};
use dicomweb_oauth_broker::metrics::Metrics;
use dicomweb_oauth_broker::rate_limiter::RateLimiter;
use dicomweb_oauth_broker::server::{AppService, HttpServer, ServerHandle};
use dicomweb_oauth_broker::token_manager::TokenManager;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tiny_http::{Header, Response as MockResponse, Server as MockServer};

fn spawn_idp() -> (String, std::thread::JoinHandle<()>) {
    let server = MockServer::http("127.0.0.1:0").expect("mock IdP should bind");
    let addr = server.server_addr();
    let worker = std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let body = json!({
                "access_token": "upstream-access-token",
                "expires_in": 3600,
                "token_type": "Bearer",
            })
            .to_string();
            let response = MockResponse::from_string(body)
                .with_header("Content-Type: application/json".parse::<Header>().unwrap());
            let _ = request.respond(response);
        }
    });
    (format!("http://{addr}/token"), worker)
}

fn spawn_upstream() -> (String, std::thread::JoinHandle<Vec<String>>) {
    let server = MockServer::http("127.0.0.1:0").expect("mock upstream should bind");
    let addr = server.server_addr();
    let worker = std::thread::spawn(move || {
        let mut seen_authorization = Vec::new();
        for mut request in server.incoming_requests() {
            let auth = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("authorization"))
                .map(|h| h.value.as_str().to_string())
                .unwrap_or_default();
            seen_authorization.push(auth);

            let mut body = Vec::new();
            let _ = request.as_reader().read_to_end(&mut body);

            let response = MockResponse::from_data(body).with_status_code(200).with_header(
                "Content-Type: application/dicom+json".parse::<Header>().unwrap(),
            );
            let _ = request.respond(response);
        }
        seen_authorization
    });
    (format!("http://{addr}"), worker)
}

fn boot_service(config: GlobalConfig, rate_limit: u32) -> (ServerHandle, SocketAddr) {
    let metrics = Arc::new(Metrics::new());
    let mut token_managers: HashMap<String, Arc<TokenManager>> = HashMap::new();
    for (name, server_config) in &config.servers {
        let manager = TokenManager::new(server_config, Duration::from_secs(5), metrics.clone())
            .expect("token manager should build");
        token_managers.insert(name.clone(), Arc::new(manager));
    }
    let rate_limiter = Arc::new(RateLimiter::new(rate_limit, Duration::from_secs(60)));

    let service = AppService::new(
        Arc::new(config),
        token_managers,
        rate_limiter,
        metrics,
        Duration::from_secs(5),
        Duration::from_secs(5),
    );

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let handle = HttpServer(service).start(addr).unwrap();
    handle.wait_ready().unwrap();
    (handle, addr)
}

fn send_raw(addr: &SocketAddr, req: &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(req).unwrap();
    stream.set_read_timeout(Some(Duration::from_millis(300))).unwrap();

    let mut buf = Vec::new();
    loop {
        let mut tmp = [0u8; 4096];
        match stream.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                break
            }
            Err(e) => panic!("read error: {e:?}"),
        }
    }

    let header_end = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response should contain a header terminator");
    let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let body = buf[header_end + 4..].to_vec();

    let mut lines = header_text.lines();
    let status_line = lines.next().unwrap_or("");
    let status = status_line.split_whitespace().nth(1).unwrap_or("0").parse().unwrap_or(0);
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    (status, headers, body)
}

fn server_config(name: &str, url: String, token_endpoint: String) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        url,
        token_endpoint,
        client_id: "broker-client".to_string(),
        client_secret: Some("secret".to_string()),
        scope: None,
        provider_type: ProviderType::Generic,
        refresh_buffer_seconds: 300,
        verify_ssl: true,
        jwt_public_key: None,
        jwt_audience: None,
        jwt_issuer: None,
        jwt_algorithms: vec!["RS256".to_string()],
        allow_symmetric_jwt: false,
        retry_config: RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 5,
            max_delay_ms: 10,
            multiplier: 2.0,
            jitter_ratio: 0.0,
        },
        circuit_breaker_config: CircuitBreakerConfig {
            failure_threshold: 3,
            open_duration_ms: 5_000,
            half_open_probes: 1,
        },
    }
}

fn base_global_config(servers: HashMap<String, ServerConfig>) -> GlobalConfig {
    GlobalConfig {
        config_version: "2.0".to_string(),
        log_level: LogLevel::Info,
        rate_limit_requests: 1000,
        rate_limit_window_seconds: 60,
        metrics_enabled: true,
        servers,
    }
}

#[test]
fn proxies_a_request_and_injects_a_bearer_token() {
    let (token_endpoint, _idp) = spawn_idp();
    let (upstream_url, upstream) = spawn_upstream();

    let mut servers = HashMap::new();
    servers.insert(
        "hospital-a".to_string(),
        server_config("hospital-a", upstream_url, token_endpoint),
    );
    let config = base_global_config(servers);
    let (handle, addr) = boot_service(config, 1000);

    let body = "--boundary\r\nContent-Type: application/dicom\r\n\r\nfake-dicom-bytes\r\n--boundary--";
    let req = format!(
        "POST /oauth-dicom-web/servers/hospital-a/studies HTTP/1.1\r\n\
         Host: localhost\r\n\
         Content-Type: multipart/related; boundary=boundary\r\n\
         Content-Length: {}\r\n\
         Authorization: Bearer should-be-stripped\r\n\
         \r\n{}",
        body.len(),
        body
    );

    let (status, _headers, response_body) = send_raw(&addr, req.as_bytes());
    handle.stop();

    assert_eq!(status, 200);
    assert_eq!(response_body, body.as_bytes(), "multipart body must survive byte-for-byte (P9)");

    let seen = upstream.join().unwrap();
    assert_eq!(seen, vec!["Bearer upstream-access-token".to_string()]);
}

#[test]
fn unknown_server_returns_400() {
    let (token_endpoint, _idp) = spawn_idp();
    let (upstream_url, _upstream) = spawn_upstream();
    let mut servers = HashMap::new();
    servers.insert(
        "hospital-a".to_string(),
        server_config("hospital-a", upstream_url, token_endpoint),
    );
    let config = base_global_config(servers);
    let (handle, addr) = boot_service(config, 1000);

    let req = b"GET /oauth-dicom-web/servers/unknown/studies HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let (status, _headers, body) = send_raw(&addr, req);
    handle.stop();

    assert_eq!(status, 400);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["data"]["error_type"], "UnknownServer");
}

#[test]
fn rate_limited_proxy_requests_receive_429() {
    let (token_endpoint, _idp) = spawn_idp();
    let (upstream_url, _upstream) = spawn_upstream();
    let mut servers = HashMap::new();
    servers.insert(
        "hospital-a".to_string(),
        server_config("hospital-a", upstream_url, token_endpoint),
    );
    let config = base_global_config(servers);
    let (handle, addr) = boot_service(config, 1);

    let req = b"GET /oauth-dicom-web/servers/hospital-a/studies HTTP/1.1\r\nHost: localhost\r\n\r\n";
    let (first_status, _, _) = send_raw(&addr, req);
    let (second_status, _, second_body) = send_raw(&addr, req);
    handle.stop();

    assert_eq!(first_status, 200);
    assert_eq!(second_status, 429);
    let json: Value = serde_json::from_slice(&second_body).unwrap();
    assert_eq!(json["data"]["error_type"], "RateLimitExceeded");
    assert_eq!(json["data"]["max_requests"], 1);
    assert_eq!(json["data"]["window_seconds"], 60);
}

fn spawn_failing_idp() -> (String, Arc<std::sync::atomic::AtomicU32>, std::thread::JoinHandle<()>) {
    let server = MockServer::http("127.0.0.1:0").expect("mock IdP should bind");
    let addr = server.server_addr();
    let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let calls_clone = calls.clone();
    let worker = std::thread::spawn(move || {
        for request in server.incoming_requests() {
            calls_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let _ = request.respond(MockResponse::empty(503));
        }
    });
    (format!("http://{addr}/token"), calls, worker)
}

/// Spec S5: a provider that always fails with a retriable (5xx) error
/// yields `503 TokenAcquisitionFailed` for the requests that actually
/// exhaust retries, then `503 CircuitOpen` once the breaker trips, with the
/// provider no longer contacted at all on that third request.
#[test]
fn retries_exhausted_then_circuit_open_map_to_distinct_error_types() {
    let (token_endpoint, idp_calls, _idp) = spawn_failing_idp();
    let (upstream_url, _upstream) = spawn_upstream();

    let mut config = server_config("hospital-a", upstream_url, token_endpoint);
    config.retry_config = RetryConfig {
        max_attempts: 1,
        initial_delay_ms: 1,
        max_delay_ms: 2,
        multiplier: 2.0,
        jitter_ratio: 0.0,
    };
    config.circuit_breaker_config = CircuitBreakerConfig {
        failure_threshold: 2,
        open_duration_ms: 5_000,
        half_open_probes: 1,
    };

    let mut servers = HashMap::new();
    servers.insert("hospital-a".to_string(), config);
    let global = base_global_config(servers);
    let (handle, addr) = boot_service(global, 1000);

    let req = b"GET /oauth-dicom-web/servers/hospital-a/studies HTTP/1.1\r\nHost: localhost\r\n\r\n";

    let (status1, _, body1) = send_raw(&addr, req);
    let (status2, _, body2) = send_raw(&addr, req);
    let calls_before_third = idp_calls.load(std::sync::atomic::Ordering::SeqCst);
    let (status3, _, body3) = send_raw(&addr, req);
    let calls_after_third = idp_calls.load(std::sync::atomic::Ordering::SeqCst);
    handle.stop();

    assert_eq!(status1, 503);
    let json1: Value = serde_json::from_slice(&body1).unwrap();
    assert_eq!(json1["data"]["error_type"], "TokenAcquisitionFailed");

    assert_eq!(status2, 503);
    let json2: Value = serde_json::from_slice(&body2).unwrap();
    assert_eq!(json2["data"]["error_type"], "TokenAcquisitionFailed");

    assert_eq!(status3, 503);
    let json3: Value = serde_json::from_slice(&body3).unwrap();
    assert_eq!(json3["data"]["error_type"], "CircuitOpen");
    assert_eq!(
        calls_after_third, calls_before_third,
        "circuit-open request must not contact the provider"
    );
}

#[test]
fn admin_endpoints_report_status_and_servers() {
    let (token_endpoint, _idp) = spawn_idp();
    let (upstream_url, _upstream) = spawn_upstream();
    let mut servers = HashMap::new();
    servers.insert(
        "hospital-a".to_string(),
        server_config("hospital-a", upstream_url, token_endpoint),
    );
    let config = base_global_config(servers);
    let (handle, addr) = boot_service(config, 1000);

    let (status, _headers, body) =
        send_raw(&addr, b"GET /dicomweb-oauth/status HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(status, 200);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["servers_configured"], 1);

    let (status, _headers, body) =
        send_raw(&addr, b"GET /dicomweb-oauth/servers HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(status, 200);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["data"]["servers"], json!(["hospital-a"]));

    let (status, _headers, body) = send_raw(
        &addr,
        b"POST /dicomweb-oauth/servers/hospital-a/test HTTP/1.1\r\nHost: localhost\r\n\r\n",
    );
    assert_eq!(status, 200);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["data"]["token_preview"], "upstrea…");

    handle.stop();
}

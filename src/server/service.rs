//! The composition root (spec §6.2): routes every inbound request to one of
//! the fixed admin endpoints or the catch-all DICOMweb proxy path.
//!
//! There is no router/dispatcher abstraction here, deliberately: the route
//! table is small and fixed (it does not come from an OpenAPI document), so
//! a straight match on method+path is the idiomatic shape for it.

use crate::audit::{self, EventKind, SecurityEvent};
use crate::config::GlobalConfig;
use crate::ids::RequestId;
use crate::metrics::Metrics;
use crate::proxy;
use crate::rate_limiter::{Admission, RateLimiter};
use crate::server::request::{parse_request, ParsedRequest};
use crate::server::response::{write_envelope, write_error_envelope, write_raw, write_rate_limit_envelope};
use crate::token_manager::TokenManager;
use may_minihttp::{HttpService, Request, Response};
use serde_json::json;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared, read-only application state. Cheap to clone: every field is an
/// `Arc` or a plain value, matching the teacher's `AppService` shape (one
/// clone handed to each accepted connection's coroutine).
#[derive(Clone)]
pub struct AppService {
    config: Arc<GlobalConfig>,
    token_managers: Arc<HashMap<String, Arc<TokenManager>>>,
    rate_limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
    /// One upstream-forwarding client per configured server, each honoring
    /// that server's own `VerifySSL` setting (spec §3) — distinct from the
    /// client a provider adapter uses to reach the IdP.
    http_clients: Arc<HashMap<String, reqwest::blocking::Client>>,
    upstream_timeout: Duration,
    started_at: Instant,
    /// Count of requests currently inside [`HttpService::call`]. Read by
    /// [`crate::server::http_server::ServerHandle::stop_graceful`] so a
    /// SIGTERM/SIGINT drains in-flight proxy requests before the process
    /// exits (SPEC_FULL.md §11) instead of cutting them off mid-response.
    in_flight: Arc<AtomicI64>,
}

/// RAII guard that counts one request for the lifetime of [`AppService::call`],
/// decrementing even if `route` panics.
struct InFlightGuard<'a>(&'a AtomicI64);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicI64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AppService {
    pub fn new(
        config: Arc<GlobalConfig>,
        token_managers: HashMap<String, Arc<TokenManager>>,
        rate_limiter: Arc<RateLimiter>,
        metrics: Arc<Metrics>,
        connect_timeout: Duration,
        upstream_timeout: Duration,
    ) -> Self {
        let http_clients = config
            .servers
            .iter()
            .map(|(name, server)| {
                (
                    name.clone(),
                    proxy::build_upstream_client(server.verify_ssl, connect_timeout),
                )
            })
            .collect();
        Self {
            config,
            token_managers: Arc::new(token_managers),
            rate_limiter,
            metrics,
            http_clients: Arc::new(http_clients),
            upstream_timeout,
            started_at: Instant::now(),
            in_flight: Arc::new(AtomicI64::new(0)),
        }
    }

    /// A clone of the in-flight request counter, for the composition root
    /// to hand to [`crate::server::http_server::ServerHandle::stop_graceful`]
    /// before this service is moved into `HttpServer`.
    pub fn in_flight_handle(&self) -> Arc<AtomicI64> {
        self.in_flight.clone()
    }

    fn handle_status(&self, res: &mut Response) {
        write_envelope(
            res,
            200,
            json!({
                "status": "ok",
                "uptime_seconds": self.started_at.elapsed().as_secs(),
                "servers_configured": self.config.servers.len(),
                "token_managers": self.token_managers.len(),
            }),
        );
    }

    fn handle_servers(&self, res: &mut Response) {
        let mut names: Vec<&str> = self.config.servers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        write_envelope(res, 200, json!({ "servers": names }));
    }

    fn handle_metrics(&self, res: &mut Response) {
        let body = self.metrics.render_prometheus_text();
        res.status_code(200, "OK");
        res.header("Content-Type: text/plain; version=0.0.4");
        res.body_vec(body.into_bytes());
    }

    fn handle_test(&self, server_name: &str, client_key: &str, res: &mut Response) {
        match self.rate_limiter.check_and_record(client_key) {
            Admission::Reject {
                limit,
                window_seconds,
            } => {
                self.metrics.record_rate_limit_rejected("admin_test");
                audit::emit(
                    SecurityEvent::new(EventKind::RateLimitExceeded)
                        .server(server_name.to_string())
                        .field("client_key", client_key.to_string())
                        .field("limit", limit as i64)
                        .field("window_seconds", window_seconds as i64),
                );
                write_rate_limit_envelope(
                    res,
                    &format!("rate limit exceeded: limit={limit}, window={window_seconds}s"),
                    limit,
                    window_seconds,
                );
                return;
            }
            Admission::Admit => {}
        }

        let Some(manager) = self.token_managers.get(server_name) else {
            write_error_envelope(
                res,
                400,
                &format!("unknown server: {server_name}"),
                "UnknownServer",
            );
            return;
        };

        match manager.acquire_and_preview() {
            Ok((token_preview, expires_in)) => {
                write_envelope(
                    res,
                    200,
                    json!({ "token_preview": token_preview, "expires_in": expires_in }),
                );
            }
            Err(err) => {
                write_error_envelope(res, err.http_status(), &err.to_string(), err.type_name());
            }
        }
    }

    fn handle_proxy(&self, server_name: &str, remaining_path: String, req: &ParsedRequest, res: &mut Response) {
        let request_id = RequestId::from_header_or_new(req.header("X-Request-Id"));
        let span = tracing::info_span!("proxy_request", request_id = %request_id, server = server_name);
        let _guard = span.enter();

        let client_key = proxy::client_identity(&req.headers);

        match self.rate_limiter.check_and_record(&client_key) {
            Admission::Reject {
                limit,
                window_seconds,
            } => {
                self.metrics.record_rate_limit_rejected("proxy");
                audit::emit(
                    SecurityEvent::new(EventKind::RateLimitExceeded)
                        .server(server_name.to_string())
                        .field("client_key", client_key.clone())
                        .field("limit", limit as i64)
                        .field("window_seconds", window_seconds as i64),
                );
                write_rate_limit_envelope(
                    res,
                    &format!("rate limit exceeded: limit={limit}, window={window_seconds}s"),
                    limit,
                    window_seconds,
                );
                return;
            }
            Admission::Admit => {}
        }

        let Some(manager) = self.token_managers.get(server_name) else {
            write_error_envelope(
                res,
                400,
                &format!("unknown server: {server_name}"),
                "UnknownServer",
            );
            return;
        };

        let token = match manager.get_token() {
            Ok(token) => token,
            Err(err) => {
                write_error_envelope(res, err.http_status(), &err.to_string(), err.type_name());
                return;
            }
        };

        let server_base_url = &self.config.servers[server_name].url;
        let Some(http_client) = self.http_clients.get(server_name) else {
            write_error_envelope(
                res,
                400,
                &format!("unknown server: {server_name}"),
                "UnknownServer",
            );
            return;
        };
        let started = Instant::now();
        let result = proxy::forward_request(
            http_client,
            server_base_url,
            &remaining_path,
            &req.method,
            &req.headers,
            req.body.clone(),
            &token,
            self.upstream_timeout,
        );

        match result {
            Ok(response) => {
                let status_class = format!("{}xx", response.status / 100);
                self.metrics
                    .record_http_request(server_name, &req.method, &status_class);
                self.metrics.observe_upstream_request_duration(
                    server_name,
                    &req.method,
                    &status_class,
                    started.elapsed().as_secs_f64(),
                );
                if response.status < 400 {
                    proxy::log_stow_success(server_name, response.status, response.body.len());
                }
                let mut headers = response.headers;
                headers.push(("X-Request-Id".to_string(), request_id.to_string()));
                write_raw(res, response.status, &headers, response.body);
            }
            Err(err) => {
                self.metrics.record_http_request(server_name, &req.method, "error");
                write_error_envelope(res, 502, &format!("upstream request failed: {err}"), "UpstreamError");
            }
        }
    }

    fn route(&self, req: &ParsedRequest, res: &mut Response) {
        if req.method == "GET" && req.path == "/dicomweb-oauth/status" {
            return self.handle_status(res);
        }
        if req.method == "GET" && req.path == "/dicomweb-oauth/servers" {
            return self.handle_servers(res);
        }
        if req.method == "GET" && req.path == "/dicomweb-oauth/metrics" {
            return self.handle_metrics(res);
        }
        if req.method == "POST" {
            if let Some(name) = req
                .path
                .strip_prefix("/dicomweb-oauth/servers/")
                .and_then(|rest| rest.strip_suffix("/test"))
            {
                let client_key = proxy::client_identity(&req.headers);
                return self.handle_test(name, &client_key, res);
            }
        }
        if let Some((name, remaining)) = proxy::split_proxy_path(&req.path) {
            return self.handle_proxy(name, remaining, req, res);
        }

        write_error_envelope(res, 404, &format!("no route for {} {}", req.method, req.path), "NotFound");
    }
}

impl HttpService for AppService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let _in_flight = InFlightGuard::enter(&self.in_flight);
        let parsed = parse_request(req)?;
        self.route(&parsed, res);
        Ok(())
    }
}

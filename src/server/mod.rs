//! HTTP server composition root, built on `may_minihttp` and the `may`
//! coroutine runtime.
//!
//! ## Architecture
//!
//! ```text
//! HTTP Connection → HttpServer → AppService::call → admin route | proxy route
//! ```
//!
//! There's no middleware chain or router/dispatcher layer: the route table
//! is the small fixed set in spec §6.2 (three admin endpoints plus one
//! catch-all proxy prefix), so [`service::AppService`] matches on
//! method+path directly rather than walking a generated route tree.
//!
//! [`request::parse_request`] turns a `may_minihttp::Request` into an
//! owned [`request::ParsedRequest`] without interpreting the body (DICOMweb
//! STOW payloads are `multipart/related` and must reach the upstream
//! byte-for-byte). [`response`] writes either the JSON admin envelope or a
//! verbatim relay of an upstream response.
//!
//! ## Example
//!
//! ```no_run
//! use dicomweb_oauth_broker::server::{AppService, HttpServer};
//! use dicomweb_oauth_broker::config::GlobalConfig;
//! use dicomweb_oauth_broker::metrics::Metrics;
//! use dicomweb_oauth_broker::rate_limiter::RateLimiter;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(GlobalConfig::load_and_validate("config.json")?);
//! let service = AppService::new(
//!     config.clone(),
//!     HashMap::new(),
//!     Arc::new(RateLimiter::new(config.rate_limit_requests, Duration::from_secs(config.rate_limit_window_seconds))),
//!     Arc::new(Metrics::new()),
//!     Duration::from_secs(10),
//!     Duration::from_secs(30),
//! );
//! HttpServer(service).start("0.0.0.0:8080")?;
//! # Ok(())
//! # }
//! ```

pub mod http_server;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use service::AppService;

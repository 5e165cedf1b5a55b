//! # DICOMweb OAuth2 Token Broker
//!
//! A transparent token-broker and request proxy that sits between a DICOM
//! host server (speaking plain HTTP with Basic auth) and cloud-hosted
//! OAuth2-protected DICOMweb endpoints (Azure Health Data Services, Google
//! Cloud Healthcare, AWS HealthImaging, Keycloak, or a generic OAuth2
//! provider). The host forwards outbound store/query requests here; this
//! crate attaches a valid bearer token, forwards to the upstream service,
//! and streams the response back unchanged.
//!
//! ## Architecture
//!
//! - **[`config`]** - `GlobalConfig`/`ServerConfig` loading and validation
//! - **[`secret_store`]** - per-instance AEAD encryption for secrets and cached tokens
//! - **[`rate_limiter`]** - sliding-window per-key admission control
//! - **[`jwt`]** - bearer-token signature and claim validation
//! - **[`provider`]** - per-IdP client-credentials token acquisition
//! - **[`resilience`]** - circuit breaker + jittered retry around provider calls
//! - **[`token_manager`]** - per-server cached token with coalesced refresh
//! - **[`proxy`]** - transparent DICOMweb request forwarding
//! - **[`audit`]** - redacted security-event trail
//! - **[`metrics`]** - counters/gauges/histograms and Prometheus exposition
//! - **[`server`]** - `may_minihttp`-served HTTP surface (admin + proxy routes)
//! - **[`logging`]** - structured JSON logging setup
//! - **[`runtime_config`]** - coroutine stack-size tuning from the environment
//! - **[`ids`]** - ULID-backed request correlation IDs
//! - **[`error`]** - the broker's typed error taxonomy, mapped to HTTP statuses
//!
//! ## Dataflow
//!
//! A forwarded request enters [`server::service::AppService`] → the rate
//! limiter admits or rejects by client identity → the server's
//! [`token_manager::TokenManager`] returns a valid bearer (from cache, or by
//! acquiring one through the circuit breaker + retry wrapper) → the request
//! is rewritten and forwarded by [`proxy`] → the upstream response is
//! streamed back verbatim.
//!
//! ## Runtime
//!
//! This crate runs on the `may` coroutine runtime, not tokio: every incoming
//! connection is served by a lightweight coroutine, and outbound calls
//! (token acquisition, upstream proxying) block that coroutine rather than
//! an OS thread. Coroutine stack size is tunable via `BRRTR_STACK_SIZE`
//! (see [`runtime_config`]).
//!
//! ## Persisted state
//!
//! None. Cached tokens, circuit-breaker state, and rate-limit buckets all
//! live in process memory and are lost on restart; this is deliberate
//! (single-process, no distributed cache).

pub mod audit;
pub mod config;
pub mod error;
pub mod ids;
pub mod jwt;
pub mod logging;
pub mod metrics;
pub mod provider;
pub mod proxy;
pub mod rate_limiter;
pub mod resilience;
pub mod runtime_config;
pub mod secret_store;
pub mod server;
pub mod token_manager;

pub use config::GlobalConfig;
pub use error::BrokerError;
pub use server::service::AppService;
pub use token_manager::TokenManager;

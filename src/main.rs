use anyhow::{Context, Result};
use dicomweb_oauth_broker::config::GlobalConfig;
use dicomweb_oauth_broker::logging;
use dicomweb_oauth_broker::metrics::Metrics;
use dicomweb_oauth_broker::rate_limiter::RateLimiter;
use dicomweb_oauth_broker::runtime_config::RuntimeConfig;
use dicomweb_oauth_broker::server::{AppService, HttpServer, ServerHandle};
use dicomweb_oauth_broker::token_manager::TokenManager;
use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config_path() -> String {
    std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string())
}

fn bind_addr() -> String {
    std::env::var("OAUTH_BROKER_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

fn upstream_timeout() -> Duration {
    std::env::var("OAUTH_BROKER_UPSTREAM_TIMEOUT_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30))
}

fn shutdown_drain_timeout() -> Duration {
    std::env::var("OAUTH_BROKER_SHUTDOWN_DRAIN_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30))
}

fn main() -> Result<()> {
    let runtime_config = RuntimeConfig::from_env();
    may::config().set_stack_size(runtime_config.stack_size);

    let path = config_path();
    let config = GlobalConfig::load_and_validate(&path)
        .with_context(|| format!("failed to load config from {path}"))?;

    let _logging_guard = logging::init(config.log_level);

    let metrics = Arc::new(Metrics::new());
    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit_requests,
        Duration::from_secs(config.rate_limit_window_seconds),
    ));

    let connect_timeout = Duration::from_secs(10);
    let mut token_managers: HashMap<String, Arc<TokenManager>> = HashMap::new();
    for (name, server_config) in &config.servers {
        let manager = TokenManager::new(server_config, connect_timeout, metrics.clone())
            .map_err(|e| anyhow::anyhow!("failed to initialize token manager for '{name}': {e}"))?;
        token_managers.insert(name.clone(), Arc::new(manager));
    }

    let service = AppService::new(
        Arc::new(config),
        token_managers,
        rate_limiter,
        metrics,
        connect_timeout,
        upstream_timeout(),
    );
    let in_flight = service.in_flight_handle();

    let addr = bind_addr();
    let server = HttpServer(service)
        .start(&addr)
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "dicomweb-oauth-broker listening");

    let handle_slot = Arc::new(Mutex::new(Some(server)));
    install_shutdown_handler(handle_slot, in_flight, shutdown_drain_timeout());

    // The signal thread owns the whole shutdown sequence (take the handle,
    // drain, then `std::process::exit`), so the main thread has nothing
    // left to do but stay alive until that happens; it never returns
    // normally, which keeps the drain from racing a `main()` return.
    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Install SIGTERM/SIGINT handling so a Kubernetes rollout or scale-down
/// stops accepting new connections and drains in-flight proxy requests
/// before exiting, rather than killing them mid-response (SPEC_FULL.md §11).
#[cfg(unix)]
fn install_shutdown_handler(
    handle_slot: Arc<Mutex<Option<ServerHandle>>>,
    in_flight: Arc<AtomicI64>,
    drain_timeout: Duration,
) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGTERM, SIGINT]) {
        Ok(signals) => signals,
        Err(err) => {
            tracing::warn!(error = %err, "failed to install signal handler, graceful shutdown disabled");
            return;
        }
    };

    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            tracing::info!(signal = signal, "received shutdown signal, draining in-flight requests");
            #[allow(clippy::expect_used)]
            let handle = handle_slot.lock().expect("server handle mutex poisoned").take();
            if let Some(handle) = handle {
                handle.stop_graceful(drain_timeout, &in_flight);
            }
            tracing::info!("drain complete, exiting");
            std::process::exit(0);
        }
    });
}

#[cfg(not(unix))]
fn install_shutdown_handler(
    _handle_slot: Arc<Mutex<Option<ServerHandle>>>,
    _in_flight: Arc<AtomicI64>,
    _drain_timeout: Duration,
) {
}

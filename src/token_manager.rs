//! The keystone component (spec §4.7): one instance per configured upstream
//! server, wrapping one provider adapter, one circuit breaker, one retry
//! policy, and one secret store instance (I6).
//!
//! The coalescing-refresh algorithm is grounded on the
//! `Broker::client_credentials()` flow of a real OAuth2 broker crate: check
//! the cache, acquire a per-key lock only on a miss, re-check under the
//! lock before calling the provider. That crate uses an async singleflight
//! guard; this adapts the same shape to a synchronous `Mutex<()>`
//! acquisition lock, consistent with the rest of this (blocking I/O)
//! crate's concurrency model.

use crate::audit::{self, EventKind, SecurityEvent};
use crate::config::ServerConfig;
use crate::error::{ResilienceError, TokenError};
use crate::jwt::{JwtValidator, ValidationOutcome};
use crate::metrics::Metrics;
use crate::provider::{build_provider, Provider, TokenProvider};
use crate::resilience::{run_with_retry, CircuitBreaker, CircuitState};
use crate::secret_store::{Ciphertext, SecretStore};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct CachedToken {
    ciphertext: Ciphertext,
    expires_at: Instant,
    expires_in_seconds_at_cache: i64,
}

pub struct TokenManager {
    server_name: String,
    provider: Provider,
    circuit_breaker: CircuitBreaker,
    retry_config: crate::config::RetryConfig,
    secret_store: SecretStore,
    jwt_validator: JwtValidator,
    refresh_buffer: Duration,
    metrics: Arc<Metrics>,
    cache: Mutex<Option<CachedToken>>,
    /// Held for the duration of an acquisition; this is what coalesces
    /// concurrent `get_token()` callers into a single provider call (I1, P1).
    acquisition_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        config: &ServerConfig,
        connect_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Result<Self, String> {
        let jwt_validator = JwtValidator::from_config(
            config.jwt_public_key.as_deref(),
            &config.jwt_algorithms,
            config.jwt_audience.as_deref(),
            config.jwt_issuer.as_deref(),
            config.client_secret.as_deref(),
        )?;
        if jwt_validator.disabled {
            tracing::warn!(
                server = %config.name,
                "JWT validation disabled: no JWTPublicKey configured, all tokens will pass through"
            );
        }

        let secret_store =
            SecretStore::new().map_err(|e| format!("failed to init secret store: {e}"))?;

        Ok(Self {
            server_name: config.name.clone(),
            provider: build_provider(config, connect_timeout),
            circuit_breaker: CircuitBreaker::new(
                config.circuit_breaker_config.failure_threshold,
                config.circuit_breaker_config.open_duration(),
            ),
            retry_config: config.retry_config.clone(),
            secret_store,
            jwt_validator,
            refresh_buffer: config.refresh_buffer(),
            metrics,
            cache: Mutex::new(None),
            acquisition_lock: Mutex::new(()),
        })
    }

    /// Current circuit-breaker state, for the admin status endpoint and the
    /// `oauth_circuit_state` gauge.
    pub fn circuit_state_gauge(&self) -> i64 {
        self.circuit_breaker.state().as_gauge_value()
    }

    /// Emit the `oauth_circuit_transition_total` counter and a
    /// `circuit_opened`/`circuit_closed` security event (spec §4.9, §4.10)
    /// when this call's observed state differs from the state before it ran.
    fn record_circuit_transition(&self, before: CircuitState, after: CircuitState) {
        if before == after {
            return;
        }
        self.metrics.record_circuit_transition(
            &self.server_name,
            before.as_label(),
            after.as_label(),
        );
        let kind = match after {
            CircuitState::Open => Some(EventKind::CircuitOpened),
            CircuitState::Closed => Some(EventKind::CircuitClosed),
            CircuitState::HalfOpen => None,
        };
        if let Some(kind) = kind {
            audit::emit(
                SecurityEvent::new(kind)
                    .server(self.server_name.clone())
                    .field("from", before.as_label())
                    .field("to", after.as_label()),
            );
        }
    }

    fn read_cache_if_valid(&self) -> Option<String> {
        #[allow(clippy::expect_used)]
        let guard = self.cache.lock().expect("token cache mutex poisoned");
        let cached = guard.as_ref()?;
        if Instant::now() + self.refresh_buffer < cached.expires_at {
            self.secret_store.decrypt(&cached.ciphertext).ok()
        } else {
            None
        }
    }

    /// Acquire a valid bearer token, refreshing if necessary (spec §4.7
    /// algorithm steps 1-7).
    pub fn get_token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.read_cache_if_valid() {
            self.metrics.record_cache_operation(&self.server_name, "hit");
            return Ok(token);
        }

        #[allow(clippy::expect_used)]
        let _acquisition_guard = self
            .acquisition_lock
            .lock()
            .expect("token acquisition mutex poisoned");

        // Re-check: another waiter may have refreshed while we waited for
        // the acquisition lock (I1).
        if let Some(token) = self.read_cache_if_valid() {
            self.metrics.record_cache_operation(&self.server_name, "hit");
            return Ok(token);
        }
        self.metrics.record_cache_operation(&self.server_name, "miss");

        let provider_name = self.provider.identify();
        let started = Instant::now();
        let provider = &self.provider;
        let state_before = self.circuit_breaker.state();
        let outcome = run_with_retry(&self.circuit_breaker, &self.retry_config, || {
            provider.acquire_token()
        });
        let state_after = self.circuit_breaker.state();
        self.metrics.set_circuit_state(&self.server_name, state_after.as_gauge_value());
        self.record_circuit_transition(state_before, state_after);

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                let result_label = match &err {
                    ResilienceError::CircuitOpen => "circuit_open",
                    ResilienceError::RetriesExhausted { .. } => "retries_exhausted",
                    ResilienceError::Provider(_) => "provider_error",
                };
                self.metrics
                    .record_token_acquired(&self.server_name, provider_name, result_label);
                self.metrics.observe_token_acquire_duration(
                    &self.server_name,
                    provider_name,
                    result_label,
                    started.elapsed().as_secs_f64(),
                );
                audit::emit(
                    SecurityEvent::new(EventKind::AuthFailure)
                        .server(self.server_name.clone())
                        .field("provider", provider_name)
                        .field("error_type", result_label),
                );
                return Err(TokenError::AcquisitionFailed(err));
            }
        };

        match self.jwt_validator.validate(&result.access_token) {
            ValidationOutcome::Valid => {}
            ValidationOutcome::Invalid(reason) => {
                self.metrics
                    .record_token_acquired(&self.server_name, provider_name, "validation_failed");
                audit::emit(
                    SecurityEvent::new(EventKind::TokenValidationFailure)
                        .server(self.server_name.clone())
                        .field("provider", provider_name)
                        .field("reason", reason.to_string()),
                );
                return Err(TokenError::ValidationFailed { reason });
            }
        }

        let ciphertext = self
            .secret_store
            .encrypt(&result.access_token)
            .map_err(TokenError::Secret)?;
        let expires_at = Instant::now() + Duration::from_secs(result.expires_in_seconds.max(0) as u64);

        #[allow(clippy::expect_used)]
        {
            let mut guard = self.cache.lock().expect("token cache mutex poisoned");
            *guard = Some(CachedToken {
                ciphertext,
                expires_at,
                expires_in_seconds_at_cache: result.expires_in_seconds,
            });
        }

        self.metrics
            .record_token_acquired(&self.server_name, provider_name, "success");
        self.metrics.observe_token_acquire_duration(
            &self.server_name,
            provider_name,
            "success",
            started.elapsed().as_secs_f64(),
        );
        self.metrics
            .set_token_expires_in(&self.server_name, result.expires_in_seconds);
        audit::emit(
            SecurityEvent::new(EventKind::AuthSuccess)
                .server(self.server_name.clone())
                .field("provider", provider_name),
        );

        Ok(result.access_token)
    }

    /// Masked preview for the admin `/test` endpoint (spec §6.2, S2): first
    /// 7 characters of the token followed by an ellipsis.
    pub fn acquire_and_preview(&self) -> Result<(String, i64), TokenError> {
        let token = self.get_token()?;
        let preview = mask_token(&token);
        #[allow(clippy::expect_used)]
        let guard = self.cache.lock().expect("token cache mutex poisoned");
        let expires_in = guard
            .as_ref()
            .map(|c| c.expires_in_seconds_at_cache)
            .unwrap_or(0);
        Ok((preview, expires_in))
    }
}

/// `mask_token("T123456789")` → `"T123456…"` (spec §6.2 S2: first 7 chars + ellipsis).
pub fn mask_token(token: &str) -> String {
    let prefix: String = token.chars().take(7).collect();
    format!("{prefix}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_token_to_first_seven_chars() {
        assert_eq!(mask_token("T1abcdefgh"), "T1abcde…");
    }

    #[test]
    fn masks_short_token_without_panicking() {
        assert_eq!(mask_token("ab"), "ab…");
    }
}

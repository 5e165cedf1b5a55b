//! Bounded, jittered exponential backoff around a provider call (spec
//! §4.6), composed with the circuit breaker (spec §4.5) so a breaker trip
//! mid-retry aborts immediately rather than continuing to sleep and retry.

use crate::config::RetryConfig;
use crate::error::{ProviderError, ResilienceError};
use crate::resilience::circuit_breaker::{CircuitBreaker, Permit};
use rand::Rng;
use std::thread::sleep;
use std::time::Duration;

fn delay_for_attempt(attempt: u32, cfg: &RetryConfig) -> Duration {
    let base = cfg.initial_delay_ms as f64 * cfg.multiplier.powi(attempt as i32 - 1);
    let capped = base.min(cfg.max_delay_ms as f64);
    let jitter_span = capped * cfg.jitter_ratio;
    let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
    let with_jitter = (capped + jitter).max(0.0);
    Duration::from_millis(with_jitter as u64)
}

/// Run `call` under the circuit breaker, retrying retriable
/// [`ProviderError`]s up to `cfg.max_attempts` times with jittered backoff.
/// Non-retriable errors fail fast (P7) without consuming a retry attempt or
/// sleeping.
pub fn run_with_retry<F>(
    breaker: &CircuitBreaker,
    cfg: &RetryConfig,
    mut call: F,
) -> Result<crate::provider::TokenAcquisitionResult, ResilienceError>
where
    F: FnMut() -> Result<crate::provider::TokenAcquisitionResult, ProviderError>,
{
    let mut last_err: Option<ProviderError> = None;

    for attempt in 1..=cfg.max_attempts {
        let permit = breaker.try_acquire()?;

        match call() {
            Ok(result) => {
                breaker.on_success();
                return Ok(result);
            }
            Err(err) => {
                if err.counts_as_circuit_failure() {
                    breaker.on_failure();
                } else {
                    breaker.on_uncounted_failure();
                }

                if !err.is_retriable() {
                    return Err(ResilienceError::Provider(err));
                }

                // A probe that failed re-opens the breaker; further
                // retries would just be rejected immediately, so stop now.
                let breaker_tripped = matches!(permit, Permit::Probe);
                last_err = Some(err);
                if breaker_tripped || attempt == cfg.max_attempts {
                    break;
                }
                sleep(delay_for_attempt(attempt, cfg));
            }
        }
    }

    #[allow(clippy::expect_used)]
    Err(ResilienceError::RetriesExhausted {
        attempts: cfg.max_attempts,
        source: last_err.expect("loop always sets last_err before exiting on failure"),
    })
}

//! Per-server circuit breaker (spec §4.5).
//!
//! Transitions are monotonic per event (I5): Closed→Open on threshold
//! crossing, Open→HalfOpen after the open duration elapses, HalfOpen→Closed
//! on probe success, HalfOpen→Open on probe failure. A `Mutex<Inner>`
//! guards the whole state machine so a transition is always all-or-nothing,
//! generalizing the teacher's `AtomicBool` single-flight debounce
//! (`security::jwks_bearer`) to a three-state machine.

use crate::error::ResilienceError;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding for the `oauth_circuit_state` gauge (spec §4.10).
    pub fn as_gauge_value(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }

    /// Label value for the `oauth_circuit_transition_total{from,to}` counter
    /// and `circuit_opened`/`circuit_closed` security events (spec §4.9, §4.10).
    pub fn as_label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Whether a half-open probe is currently in flight; only one probe is
    /// permitted per half-open window (spec §4.5 "permit exactly one probe").
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    open_duration: Duration,
    inner: Mutex<Inner>,
    /// Mirrors `inner.state` for lock-free metric reads.
    gauge: AtomicU8,
}

/// What the caller may do for this attempt.
pub enum Permit {
    /// Proceed normally; record the outcome via `on_success`/`on_failure`.
    Go,
    /// Proceed as the single half-open probe; record via `on_probe_result`.
    Probe,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            failure_threshold,
            open_duration,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            gauge: AtomicU8::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        #[allow(clippy::expect_used)]
        self.inner.lock().expect("circuit breaker mutex poisoned").state
    }

    fn set_state(&self, inner: &mut Inner, state: CircuitState) {
        inner.state = state;
        self.gauge.store(state.as_gauge_value() as u8, Ordering::Relaxed);
    }

    /// Decide whether the caller may proceed, transitioning Open→HalfOpen if
    /// the open duration has elapsed.
    pub fn try_acquire(&self) -> Result<Permit, ResilienceError> {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => Ok(Permit::Go),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.open_duration)
                    .unwrap_or(false);
                if elapsed {
                    self.set_state(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(Permit::Probe)
                } else {
                    Err(ResilienceError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(ResilienceError::CircuitOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(Permit::Probe)
                }
            }
        }
    }

    pub fn on_success(&self) {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        self.set_state(&mut inner, CircuitState::Closed);
    }

    /// Record a counted failure (spec §4.5: only `NetworkError`/
    /// `ProviderUnavailable`/timeout advance the counter).
    pub fn on_failure(&self) {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.probe_in_flight = false;
        inner.consecutive_failures += 1;
        if inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold
        {
            inner.opened_at = Some(Instant::now());
            self.set_state(&mut inner, CircuitState::Open);
        }
    }

    /// Record an uncounted failure (misconfiguration, e.g. `Unauthorized`):
    /// resets neither counter nor state.
    pub fn on_uncounted_failure(&self) {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.probe_in_flight = false;
    }
}

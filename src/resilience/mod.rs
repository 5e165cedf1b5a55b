//! Failure isolation and bounded retry around provider calls (spec §4.5,
//! §4.6).

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use retry::run_with_retry;

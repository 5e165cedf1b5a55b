//! Structured error taxonomy for the broker.
//!
//! Every variant maps deterministically to an HTTP status and `error_type`
//! string for the admin/proxy response envelope (spec §6.2, §7).

use thiserror::Error;

/// Errors raised while loading or validating [`crate::config::GlobalConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("configuration is invalid: {problems:?}")]
    Validation { problems: Vec<String> },
}

/// Errors raised by the [`crate::secret_store::SecretStore`].
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("failed to initialize secret store: insufficient entropy")]
    KeyGeneration,

    #[error("secret decryption failed: ciphertext does not authenticate under this instance's key")]
    Decryption,
}

/// Errors raised by a provider adapter during client-credentials acquisition.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error contacting identity provider: {0}")]
    Network(String),

    #[error("identity provider unavailable (5xx): {status}")]
    ProviderUnavailable { status: u16 },

    #[error("identity provider rejected credentials (4xx): {status}")]
    Unauthorized { status: u16 },

    #[error("identity provider denied the requested scope")]
    ScopeDenied,

    #[error("identity provider returned a malformed token response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Whether this failure should be counted by the circuit breaker and
    /// retried by the retry wrapper (spec §4.5, §4.6).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::ProviderUnavailable { .. }
        )
    }

    /// Whether this failure should advance the circuit breaker's
    /// consecutive-failure counter (spec §4.5: misconfiguration does not).
    pub fn counts_as_circuit_failure(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::ProviderUnavailable { .. }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.is_server_error() {
                return ProviderError::ProviderUnavailable {
                    status: status.as_u16(),
                };
            }
            if status.is_client_error() {
                return ProviderError::Unauthorized {
                    status: status.as_u16(),
                };
            }
        }
        ProviderError::Network(err.to_string())
    }
}

/// Errors raised by the resilience layer wrapping a provider call.
#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("circuit breaker is open for this server")]
    CircuitOpen,

    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A reason a JWT failed validation (spec §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JwtValidationReason {
    #[error("signature verification failed")]
    BadSignature,
    #[error("token is expired")]
    Expired,
    #[error("token is not yet valid (nbf)")]
    NotYetValid,
    #[error("audience mismatch")]
    AudienceMismatch,
    #[error("issuer mismatch")]
    IssuerMismatch,
    #[error("unsupported or disallowed algorithm")]
    DisallowedAlgorithm,
    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Errors crossing the Token Manager boundary (spec §7 "Crossing the Token
/// Manager boundary").
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token acquisition failed: {0}")]
    AcquisitionFailed(#[from] ResilienceError),

    #[error("token validation failed: {reason}")]
    ValidationFailed { reason: JwtValidationReason },

    #[error("rate limit exceeded: {key}, limit={limit}, window={window_seconds}s")]
    RateLimitExceeded {
        key: String,
        limit: u32,
        window_seconds: u64,
    },

    #[error(transparent)]
    Secret(#[from] SecretError),
}

impl TokenError {
    /// HTTP status this error maps to in the admin/proxy response envelope.
    pub fn http_status(&self) -> u16 {
        match self {
            TokenError::AcquisitionFailed(ResilienceError::CircuitOpen) => 503,
            // Retries are only ever exhausted on a retriable `ProviderError`
            // (`Network`/`ProviderUnavailable` — a non-retriable error fails
            // fast as `ResilienceError::Provider` before any retry loop
            // runs, see retry.rs), so this is always an IdP-unavailability
            // condition, not a client misconfiguration (spec §7, S5).
            TokenError::AcquisitionFailed(ResilienceError::RetriesExhausted { .. }) => 503,
            TokenError::AcquisitionFailed(ResilienceError::Provider(p)) => {
                if matches!(p, ProviderError::ProviderUnavailable { .. }) {
                    503
                } else {
                    502
                }
            }
            TokenError::ValidationFailed { .. } => 502,
            TokenError::RateLimitExceeded { .. } => 429,
            TokenError::Secret(_) => 500,
        }
    }

    /// The machine-readable `error_type` tag for the error envelope.
    pub fn type_name(&self) -> &'static str {
        match self {
            TokenError::AcquisitionFailed(ResilienceError::CircuitOpen) => "CircuitOpen",
            TokenError::AcquisitionFailed(ResilienceError::RetriesExhausted { .. }) => {
                "TokenAcquisitionFailed"
            }
            TokenError::AcquisitionFailed(ResilienceError::Provider(_)) => {
                "TokenAcquisitionFailed"
            }
            TokenError::ValidationFailed { .. } => "TokenValidationFailed",
            TokenError::RateLimitExceeded { .. } => "RateLimitExceeded",
            TokenError::Secret(_) => "SecretDecryptionError",
        }
    }
}

/// Top-level error type for the broker binary's composition root.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("unknown server name: {0}")]
    UnknownServer(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    pub fn http_status(&self) -> u16 {
        match self {
            BrokerError::Config(_) => 500,
            BrokerError::Token(e) => e.http_status(),
            BrokerError::UnknownServer(_) => 400,
            BrokerError::Io(_) => 500,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            BrokerError::Config(_) => "ConfigValidationError",
            BrokerError::Token(e) => e.type_name(),
            BrokerError::UnknownServer(_) => "UnknownServer",
            BrokerError::Io(_) => "IoError",
        }
    }
}

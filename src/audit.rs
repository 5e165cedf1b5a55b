//! Security-event audit trail (spec §3 `SecurityEvent`, §4.9).
//!
//! Every event is emitted through [`emit`], which redacts sensitive fields
//! at serialization time — a call site cannot forget to redact, because it
//! never has the chance to log the raw fields map itself.

use serde_json::{Map, Value};
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Enumerated security-event kinds (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    AuthSuccess,
    AuthFailure,
    TokenValidationFailure,
    RateLimitExceeded,
    SslVerificationFailure,
    ConfigChange,
    UnauthorizedAccess,
    CircuitOpened,
    CircuitClosed,
}

impl EventKind {
    fn as_str(&self) -> &'static str {
        match self {
            EventKind::AuthSuccess => "auth_success",
            EventKind::AuthFailure => "auth_failure",
            EventKind::TokenValidationFailure => "token_validation_failure",
            EventKind::RateLimitExceeded => "rate_limit_exceeded",
            EventKind::SslVerificationFailure => "ssl_verification_failure",
            EventKind::ConfigChange => "config_change",
            EventKind::UnauthorizedAccess => "unauthorized_access",
            EventKind::CircuitOpened => "circuit_opened",
            EventKind::CircuitClosed => "circuit_closed",
        }
    }
}

/// Field keys that must never reach a log sink in plaintext (spec §4.9
/// redaction contract).
const REDACTED_KEYS: &[&str] = &[
    "client_secret",
    "password",
    "token",
    "access_token",
    "refresh_token",
    "authorization",
];

const REDACTED_PLACEHOLDER: &str = "***REDACTED***";

pub struct SecurityEvent {
    pub event_type: EventKind,
    pub server: Option<String>,
    pub fields: HashMap<String, Value>,
}

impl SecurityEvent {
    pub fn new(event_type: EventKind) -> Self {
        Self {
            event_type,
            server: None,
            fields: HashMap::new(),
        }
    }

    pub fn server(mut self, name: impl Into<String>) -> Self {
        self.server = Some(name.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

fn redact(fields: &HashMap<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| {
            if REDACTED_KEYS.contains(&k.to_ascii_lowercase().as_str()) {
                (k.clone(), Value::String(REDACTED_PLACEHOLDER.to_string()))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

/// ISO-8601 `Z`-suffixed UTC timestamp (spec §4.9) via `time::OffsetDateTime`,
/// consistent with the `time` usage in this crate's grounding corpus (an
/// OAuth2 broker's token-flow and HTTP modules both build their request
/// timestamps the same way).
pub(crate) fn iso8601_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Emit a security event: `tracing::warn!` with `security_event=true` and a
/// fully-redacted JSON `fields` object (P3, P10).
pub fn emit(event: SecurityEvent) {
    let redacted = redact(&event.fields);
    let payload = serde_json::json!({
        "event_type": event.event_type.as_str(),
        "timestamp": iso8601_now(),
        "server": event.server,
        "fields": redacted,
    });
    tracing::warn!(security_event = true, event = %payload, "security event");
}

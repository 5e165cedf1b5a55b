//! Configuration surface (spec §3, §6.1).
//!
//! The on-disk format is a single JSON document keyed by `DicomWebOAuth`.
//! `${NAME}` references in string leaves are expanded against the process
//! environment before the document is parsed into [`GlobalConfig`].
//! Loaded configuration is validated once, then immutable for the rest of
//! the process lifetime.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// `auto|azure|google|aws|keycloak|generic|managed-identity` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Auto,
    Azure,
    Google,
    Aws,
    Keycloak,
    Generic,
    ManagedIdentity,
}

/// Retry policy knobs (spec §4.6).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter_ratio() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

/// Circuit breaker thresholds (spec §4.5).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_duration_ms")]
    pub open_duration_ms: u64,
    #[serde(default = "default_half_open_probes")]
    pub half_open_probes: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_open_duration_ms() -> u64 {
    30_000
}
fn default_half_open_probes() -> u32 {
    1
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_ms: default_open_duration_ms(),
            half_open_probes: default_half_open_probes(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

/// One upstream DICOMweb endpoint (spec §3 `ServerConfig`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerConfig {
    #[serde(skip)]
    pub name: String,

    pub url: String,
    pub token_endpoint: String,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_provider_type")]
    pub provider_type: ProviderType,
    #[serde(default = "default_refresh_buffer")]
    pub refresh_buffer_seconds: i64,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default)]
    pub jwt_public_key: Option<String>,
    #[serde(default)]
    pub jwt_audience: Option<String>,
    #[serde(default)]
    pub jwt_issuer: Option<String>,
    #[serde(default = "default_jwt_algorithms")]
    pub jwt_algorithms: Vec<String>,
    /// Opt-in: permit an HMAC algorithm in `jwt_algorithms` (§9 Open Question,
    /// resolved in DESIGN.md: default-deny).
    #[serde(default)]
    pub allow_symmetric_jwt: bool,
    #[serde(default)]
    pub retry_config: RetryConfig,
    #[serde(default)]
    pub circuit_breaker_config: CircuitBreakerConfig,
}

fn default_provider_type() -> ProviderType {
    ProviderType::Auto
}
fn default_refresh_buffer() -> i64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_jwt_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

impl ServerConfig {
    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_seconds.max(0) as u64)
    }
}

/// `LogLevel` string from the config document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServersSection(HashMap<String, ServerConfig>);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawDicomWebOAuth {
    #[serde(default)]
    config_version: Option<String>,
    log_level: LogLevel,
    rate_limit_requests: i64,
    rate_limit_window_seconds: i64,
    #[serde(default = "default_true")]
    enable_metrics: bool,
    servers: HashMap<String, ServerConfig>,
}

#[derive(Debug, Deserialize)]
struct RawRoot {
    #[serde(rename = "DicomWebOAuth")]
    dicom_web_oauth: RawDicomWebOAuth,
}

/// Frozen, validated top-level configuration (spec §3 `GlobalConfig`).
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub config_version: String,
    pub log_level: LogLevel,
    pub rate_limit_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub metrics_enabled: bool,
    pub servers: HashMap<String, ServerConfig>,
}

impl GlobalConfig {
    /// Read, env-expand, parse, and validate a configuration file in one call.
    pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let raw = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::parse_and_validate(&raw)
    }

    /// Parse and validate an already-read configuration document.
    pub fn parse_and_validate(raw_json: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(raw_json);
        let root: RawRoot = serde_json::from_str(&expanded)?;
        let doc = root.dicom_web_oauth;

        let mut problems = Vec::new();
        if doc.rate_limit_requests < 1 {
            problems.push("RateLimitRequests must be >= 1".to_string());
        }
        if doc.rate_limit_window_seconds < 1 {
            problems.push("RateLimitWindowSeconds must be >= 1".to_string());
        }

        let mut servers = HashMap::with_capacity(doc.servers.len());
        for (name, mut server) in doc.servers {
            server.name = name.clone();
            if server.url.trim().is_empty() {
                problems.push(format!("server '{name}': Url is required"));
            }
            if server.token_endpoint.trim().is_empty() {
                problems.push(format!("server '{name}': TokenEndpoint is required"));
            }
            if server.refresh_buffer_seconds < 0 {
                problems.push(format!(
                    "server '{name}': TokenRefreshBufferSeconds must be >= 0"
                ));
            }
            if server.retry_config.max_attempts == 0 {
                problems.push(format!("server '{name}': RetryConfig.max_attempts must be >= 1"));
            }
            for alg in &server.jwt_algorithms {
                let upper = alg.to_ascii_uppercase();
                if upper == "NONE" {
                    problems.push(format!(
                        "server '{name}': JWTAlgorithms must not include \"none\""
                    ));
                } else if upper.starts_with("HS") && !server.allow_symmetric_jwt {
                    problems.push(format!(
                        "server '{name}': JWTAlgorithms includes HMAC algorithm '{alg}' but AllowSymmetricJWT is not set"
                    ));
                }
            }
            servers.insert(name, server);
        }

        if !problems.is_empty() {
            return Err(ConfigError::Validation { problems });
        }

        Ok(GlobalConfig {
            config_version: doc.config_version.unwrap_or_else(|| "2.0".to_string()),
            log_level: doc.log_level,
            rate_limit_requests: doc.rate_limit_requests as u32,
            rate_limit_window_seconds: doc.rate_limit_window_seconds as u64,
            metrics_enabled: doc.enable_metrics,
            servers,
        })
    }
}

/// Expand `${NAME}` references against the process environment. Unknown
/// names are left untouched so a missing var surfaces as a JSON/validation
/// error downstream rather than silently becoming an empty string.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c == '$' && chars.peek().map(|(_, c)| *c) == Some('{') {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for (_, c2) in chars.by_ref() {
                if c2 == '}' {
                    closed = true;
                    break;
                }
                name.push(c2);
            }
            if closed {
                match std::env::var(&name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(&name);
                        out.push('}');
                    }
                }
            } else {
                out.push_str("${");
                out.push_str(&name);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        r#"{
          "DicomWebOAuth": {
            "ConfigVersion": "2.0",
            "LogLevel": "INFO",
            "RateLimitRequests": 100,
            "RateLimitWindowSeconds": 60,
            "EnableMetrics": true,
            "Servers": {
              "s1": {
                "Url": "https://dicom.example.com",
                "TokenEndpoint": "https://idp.example.com/token",
                "ClientId": "client-1",
                "ClientSecret": "${TEST_CLIENT_SECRET}",
                "Scope": "dicom.read",
                "ProviderType": "generic"
              }
            }
          }
        }"#
        .to_string()
    }

    #[test]
    fn expands_env_vars() {
        std::env::set_var("TEST_CLIENT_SECRET", "super-secret-value");
        let cfg = GlobalConfig::parse_and_validate(&sample_json()).unwrap();
        let server = cfg.servers.get("s1").unwrap();
        assert_eq!(server.client_secret.as_deref(), Some("super-secret-value"));
        assert_eq!(server.name, "s1");
    }

    #[test]
    fn rejects_zero_rate_limit() {
        let mut json = sample_json();
        json = json.replace("\"RateLimitRequests\": 100", "\"RateLimitRequests\": 0");
        let err = GlobalConfig::parse_and_validate(&json).unwrap_err();
        match err {
            ConfigError::Validation { problems } => {
                assert!(problems.iter().any(|p| p.contains("RateLimitRequests")));
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_url() {
        let json = sample_json().replace("https://dicom.example.com", "");
        let err = GlobalConfig::parse_and_validate(&json).unwrap_err();
        match err {
            ConfigError::Validation { problems } => {
                assert!(problems.iter().any(|p| p.contains("Url is required")));
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_none_algorithm() {
        let json = sample_json().replace(
            "\"ProviderType\": \"generic\"",
            "\"ProviderType\": \"generic\", \"JWTAlgorithms\": [\"none\"]",
        );
        let err = GlobalConfig::parse_and_validate(&json).unwrap_err();
        match err {
            ConfigError::Validation { problems } => {
                assert!(problems.iter().any(|p| p.contains("must not include")));
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unopted_hmac() {
        let json = sample_json().replace(
            "\"ProviderType\": \"generic\"",
            "\"ProviderType\": \"generic\", \"JWTAlgorithms\": [\"HS256\"]",
        );
        let err = GlobalConfig::parse_and_validate(&json).unwrap_err();
        match err {
            ConfigError::Validation { problems } => {
                assert!(problems.iter().any(|p| p.contains("AllowSymmetricJWT")));
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
    }
}

//! Provider adapters: client-credentials token acquisition across
//! heterogeneous identity providers (spec §4.4).
//!
//! The duck-typed provider hierarchy of the system this crate replaces
//! becomes a small tagged enum dispatched through one trait (spec §9
//! "Re-architecting dynamic patterns"): [`Provider`] wraps exactly one of
//! the variants below, each implementing [`TokenProvider`].

mod aws;
mod azure;
mod generic;
mod google;
mod keycloak;
mod managed_identity;

use crate::config::{ProviderType, ServerConfig};
use crate::error::ProviderError;
use std::time::Duration;

/// Transient value returned from a provider call (spec §3
/// `TokenAcquisitionResult`). Never persisted as-is; the caller encrypts
/// `access_token` before it touches the cache.
#[derive(Debug, Clone)]
pub struct TokenAcquisitionResult {
    pub access_token: String,
    pub expires_in_seconds: i64,
    pub token_type: String,
}

/// Capability set common to every adapter (spec §4.4).
pub trait TokenProvider: Send + Sync {
    fn acquire_token(&self) -> Result<TokenAcquisitionResult, ProviderError>;

    /// Stable identifier used in metric labels and log fields — never the
    /// tenant/account-specific endpoint, to keep label cardinality bounded.
    fn identify(&self) -> &'static str;
}

/// A constructed provider variant for one server.
pub enum Provider {
    Generic(generic::GenericProvider),
    Azure(azure::AzureProvider),
    Google(google::GoogleProvider),
    Aws(aws::AwsProvider),
    Keycloak(keycloak::KeycloakProvider),
    ManagedIdentity(managed_identity::ManagedIdentityProvider),
}

impl TokenProvider for Provider {
    fn acquire_token(&self) -> Result<TokenAcquisitionResult, ProviderError> {
        match self {
            Provider::Generic(p) => p.acquire_token(),
            Provider::Azure(p) => p.acquire_token(),
            Provider::Google(p) => p.acquire_token(),
            Provider::Aws(p) => p.acquire_token(),
            Provider::Keycloak(p) => p.acquire_token(),
            Provider::ManagedIdentity(p) => p.acquire_token(),
        }
    }

    fn identify(&self) -> &'static str {
        match self {
            Provider::Generic(p) => p.identify(),
            Provider::Azure(p) => p.identify(),
            Provider::Google(p) => p.identify(),
            Provider::Aws(p) => p.identify(),
            Provider::Keycloak(p) => p.identify(),
            Provider::ManagedIdentity(p) => p.identify(),
        }
    }
}

/// Auto-detection (spec §4.4): inspect the token endpoint host when
/// `provider_type` is `Auto`, falling back to Generic.
fn detect_provider_type(token_endpoint: &str) -> ProviderType {
    let host = url::Url::parse(token_endpoint)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();

    if host.eq_ignore_ascii_case("login.microsoftonline.com") {
        ProviderType::Azure
    } else if host.eq_ignore_ascii_case("oauth2.googleapis.com") {
        ProviderType::Google
    } else if host.contains("cognito-idp.") && host.ends_with(".amazonaws.com") {
        ProviderType::Aws
    } else if token_endpoint.contains("/realms/") {
        ProviderType::Keycloak
    } else {
        ProviderType::Generic
    }
}

/// Build the provider variant for one server's configuration.
pub fn build_provider(config: &ServerConfig, connect_timeout: Duration) -> Provider {
    let effective = match config.provider_type {
        ProviderType::Auto => detect_provider_type(&config.token_endpoint),
        other => other,
    };

    match effective {
        ProviderType::Azure => Provider::Azure(azure::AzureProvider::new(config, connect_timeout)),
        ProviderType::Google => {
            Provider::Google(google::GoogleProvider::new(config, connect_timeout))
        }
        ProviderType::Aws => Provider::Aws(aws::AwsProvider::new(config, connect_timeout)),
        ProviderType::Keycloak => {
            Provider::Keycloak(keycloak::KeycloakProvider::new(config, connect_timeout))
        }
        ProviderType::ManagedIdentity => Provider::ManagedIdentity(
            managed_identity::ManagedIdentityProvider::new(config, connect_timeout),
        ),
        ProviderType::Generic | ProviderType::Auto => {
            Provider::Generic(generic::GenericProvider::new(config, connect_timeout))
        }
    }
}

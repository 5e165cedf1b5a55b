use super::generic::{build_client, client_credentials_request};
use crate::config::ServerConfig;
use crate::error::ProviderError;
use crate::provider::TokenAcquisitionResult;
use std::time::Duration;

/// Keycloak realm token endpoint, client-credentials flow (spec §4.4).
/// Wire-compatible with Generic; kept distinct for metric/log labeling.
pub struct KeycloakProvider {
    token_endpoint: String,
    client_id: String,
    client_secret: Option<String>,
    scope: Option<String>,
    client: reqwest::blocking::Client,
}

impl KeycloakProvider {
    pub fn new(config: &ServerConfig, connect_timeout: Duration) -> Self {
        Self {
            token_endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
            client: build_client(config.verify_ssl, connect_timeout),
        }
    }
}

impl super::TokenProvider for KeycloakProvider {
    fn acquire_token(&self) -> Result<TokenAcquisitionResult, ProviderError> {
        client_credentials_request(
            &self.client,
            &self.token_endpoint,
            &self.client_id,
            self.client_secret.as_deref(),
            self.scope.as_deref(),
        )
    }

    fn identify(&self) -> &'static str {
        "keycloak"
    }
}

use super::generic::{build_client, client_credentials_request};
use crate::config::ServerConfig;
use crate::error::ProviderError;
use crate::provider::TokenAcquisitionResult;
use std::time::Duration;

/// Azure AD v2 token endpoint, client-credentials flow (spec §4.4). Same
/// wire contract as Generic; the tenant-scoped URL and
/// `https://*.default` scope convention live entirely in the operator's
/// configured `TokenEndpoint`/`Scope`, so this adapter only needs to exist
/// as a distinct, clearly-labeled identity for metrics/logging.
pub struct AzureProvider {
    token_endpoint: String,
    client_id: String,
    client_secret: Option<String>,
    scope: Option<String>,
    client: reqwest::blocking::Client,
}

impl AzureProvider {
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

impl super::TokenProvider for AzureProvider {
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
        "azure"
    }
}

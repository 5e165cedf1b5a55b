use super::generic::build_client;
use crate::config::ServerConfig;
use crate::error::ProviderError;
use crate::provider::TokenAcquisitionResult;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_expires_in() -> i64 {
    3600
}
fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Platform-managed identity (spec §4.4): no client secret; the adapter
/// calls the platform's local metadata endpoint (already configured in
/// `TokenEndpoint`, e.g. Azure IMDS `http://169.254.169.254/metadata/identity/oauth2/token`)
/// scoped to the target resource via `Scope`.
pub struct ManagedIdentityProvider {
    metadata_endpoint: String,
    scope: Option<String>,
    client: reqwest::blocking::Client,
}

impl ManagedIdentityProvider {
    pub fn new(config: &ServerConfig, connect_timeout: Duration) -> Self {
        Self {
            metadata_endpoint: config.token_endpoint.clone(),
            scope: config.scope.clone(),
            client: build_client(config.verify_ssl, connect_timeout),
        }
    }
}

impl super::TokenProvider for ManagedIdentityProvider {
    fn acquire_token(&self) -> Result<TokenAcquisitionResult, ProviderError> {
        let mut request = self
            .client
            .get(&self.metadata_endpoint)
            .header("Metadata", "true");
        if let Some(scope) = &self.scope {
            request = request.query(&[("resource", scope.as_str())]);
        }

        let response = request.send().map_err(ProviderError::from)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::ProviderUnavailable {
                status: status.as_u16(),
            });
        }
        if status.is_client_error() {
            return Err(ProviderError::Unauthorized {
                status: status.as_u16(),
            });
        }

        let body: MetadataTokenResponse = response
            .json()
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        Ok(TokenAcquisitionResult {
            access_token: body.access_token,
            expires_in_seconds: body.expires_in,
            token_type: body.token_type,
        })
    }

    fn identify(&self) -> &'static str {
        "managed-identity"
    }
}

use super::generic::build_client;
use crate::config::ServerConfig;
use crate::error::ProviderError;
use crate::provider::TokenAcquisitionResult;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TokenResponse {
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

/// AWS Cognito user-pool `/oauth2/token` client-credentials flow (spec
/// §4.4). Cognito (and HealthImaging fronted by it) expects HTTP Basic
/// auth with `client_id:client_secret` rather than form-encoded
/// credentials.
pub struct AwsProvider {
    token_endpoint: String,
    client_id: String,
    client_secret: Option<String>,
    scope: Option<String>,
    client: reqwest::blocking::Client,
}

impl AwsProvider {
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

impl super::TokenProvider for AwsProvider {
    fn acquire_token(&self) -> Result<TokenAcquisitionResult, ProviderError> {
        let mut form: Vec<(&str, &str)> = vec![("grant_type", "client_credentials")];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope));
        }

        let secret = self.client_secret.as_deref().unwrap_or_default();
        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.client_id, secret));

        let response = self
            .client
            .post(&self.token_endpoint)
            .header("Authorization", format!("Basic {basic}"))
            .form(&form)
            .send()
            .map_err(ProviderError::from)?;

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

        let body: TokenResponse = response
            .json()
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        Ok(TokenAcquisitionResult {
            access_token: body.access_token,
            expires_in_seconds: body.expires_in,
            token_type: body.token_type,
        })
    }

    fn identify(&self) -> &'static str {
        "aws"
    }
}

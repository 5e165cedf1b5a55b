use crate::config::ServerConfig;
use crate::error::ProviderError;
use crate::provider::TokenAcquisitionResult;
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

/// Shared client-credentials POST used by Generic, Azure AD, and Keycloak
/// adapters (spec §4.4: "same as Generic with [a provider-specific]
/// endpoint"). The client secret is only ever held in this stack frame while
/// the form body is built (I3).
pub(super) fn client_credentials_request(
    client: &reqwest::blocking::Client,
    token_endpoint: &str,
    client_id: &str,
    client_secret: Option<&str>,
    scope: Option<&str>,
) -> Result<TokenAcquisitionResult, ProviderError> {
    let mut form: Vec<(&str, &str)> = vec![
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
    ];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }
    if let Some(scope) = scope {
        form.push(("scope", scope));
    }

    let response = client
        .post(token_endpoint)
        .form(&form)
        .send()
        .map_err(ProviderError::from)?;

    let status = response.status();
    if status.is_server_error() {
        return Err(ProviderError::ProviderUnavailable {
            status: status.as_u16(),
        });
    }
    if status.as_u16() == 403 {
        return Err(ProviderError::ScopeDenied);
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

pub(super) fn build_client(verify_ssl: bool, connect_timeout: Duration) -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(!verify_ssl)
        .connect_timeout(connect_timeout)
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

pub struct GenericProvider {
    token_endpoint: String,
    client_id: String,
    client_secret: Option<String>,
    scope: Option<String>,
    client: reqwest::blocking::Client,
}

impl GenericProvider {
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

impl super::TokenProvider for GenericProvider {
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
        "generic"
    }
}

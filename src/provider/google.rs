use super::generic::build_client;
use crate::config::ServerConfig;
use crate::error::ProviderError;
use crate::provider::TokenAcquisitionResult;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The subset of a GCP service-account JSON key this adapter needs. The
/// whole key document is expected in `ServerConfig.client_secret` (the
/// field is generic across adapters; Google's client-credentials analogue
/// is a self-signed JWT assertion, not a shared secret).
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

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

/// Google OAuth2 JWT-Bearer grant (spec §4.4): the adapter mints a
/// self-signed assertion with the service account's private key instead of
/// presenting a client secret.
pub struct GoogleProvider {
    token_endpoint: String,
    service_account_json: Option<String>,
    scope: Option<String>,
    client: reqwest::blocking::Client,
}

impl GoogleProvider {
    pub fn new(config: &ServerConfig, connect_timeout: Duration) -> Self {
        Self {
            token_endpoint: config.token_endpoint.clone(),
            service_account_json: config.client_secret.clone(),
            scope: config.scope.clone(),
            client: build_client(config.verify_ssl, connect_timeout),
        }
    }

    fn build_assertion(&self) -> Result<String, ProviderError> {
        let json = self.service_account_json.as_deref().ok_or_else(|| {
            ProviderError::MalformedResponse(
                "ClientSecret must contain the service-account JSON key for Google provider"
                    .to_string(),
            )
        })?;
        let key: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| ProviderError::MalformedResponse(format!("invalid service account key: {e}")))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| ProviderError::MalformedResponse("system clock before epoch".to_string()))?
            .as_secs() as i64;

        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: self.scope.as_deref().unwrap_or_default(),
            aud: &self.token_endpoint,
            exp: now + 3600,
            iat: now,
        };

        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ProviderError::MalformedResponse(format!("invalid private key: {e}")))?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| ProviderError::MalformedResponse(format!("failed to sign assertion: {e}")))
    }
}

impl super::TokenProvider for GoogleProvider {
    fn acquire_token(&self) -> Result<TokenAcquisitionResult, ProviderError> {
        let assertion = self.build_assertion()?;
        let form = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];

        let response = self
            .client
            .post(&self.token_endpoint)
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
        "google"
    }
}

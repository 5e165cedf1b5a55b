//! Bearer token signature + claim validation (spec §4.3).
//!
//! Adapted from a JWKS-fetching multi-key validator down to a single static
//! public key handed to us at config-load time: the broker already knows
//! which key signs tokens for a given server, so there is no discovery
//! endpoint to poll or cache-refresh debounce to manage.

use crate::error::JwtValidationReason;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use std::collections::HashSet;

/// Algorithms the validator will ever attempt, mirroring the teacher's
/// explicit allow-list rather than trusting the token header's `alg` claim.
const ALWAYS_ALLOWED: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::ES256,
    Algorithm::ES384,
];
const SYMMETRIC_ALLOWED: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
const EC_ALGORITHMS: &[Algorithm] = &[Algorithm::ES256, Algorithm::ES384];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid(JwtValidationReason),
}

/// Per-server JWT validator. Constructed once at startup from
/// [`crate::config::ServerConfig`].
pub struct JwtValidator {
    decoding_key: Option<DecodingKey>,
    algorithms: HashSet<Algorithm>,
    audience: Option<String>,
    issuer: Option<String>,
    /// Set only when no public key was configured (spec §4.3 "disabled"
    /// mode). Logged once by the caller at construction time.
    pub disabled: bool,
}

impl JwtValidator {
    /// Build a validator from a server's JWT settings. `hmac_secret` is only
    /// consulted when an HMAC algorithm is both requested and permitted
    /// (config validation already enforces `allow_symmetric_jwt`).
    pub fn from_config(
        public_key_pem: Option<&str>,
        algorithms: &[String],
        audience: Option<&str>,
        issuer: Option<&str>,
        hmac_secret: Option<&str>,
    ) -> Result<Self, String> {
        let requested: HashSet<Algorithm> = algorithms
            .iter()
            .filter_map(|a| parse_algorithm(a))
            .collect();

        let Some(pem) = public_key_pem else {
            return Ok(Self {
                decoding_key: None,
                algorithms: requested,
                audience: audience.map(str::to_string),
                issuer: issuer.map(str::to_string),
                disabled: true,
            });
        };

        let has_symmetric = requested.iter().any(|a| SYMMETRIC_ALLOWED.contains(a));
        let has_ec = requested.iter().any(|a| EC_ALGORITHMS.contains(a));
        let decoding_key = if has_symmetric {
            let secret = hmac_secret.ok_or_else(|| {
                "HMAC algorithm requested but no shared secret configured".to_string()
            })?;
            DecodingKey::from_secret(secret.as_bytes())
        } else if has_ec {
            DecodingKey::from_ec_pem(pem.as_bytes())
                .map_err(|e| format!("invalid JWTPublicKey PEM: {e}"))?
        } else {
            DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| format!("invalid JWTPublicKey PEM: {e}"))?
        };

        Ok(Self {
            decoding_key: Some(decoding_key),
            algorithms: requested,
            audience: audience.map(str::to_string),
            issuer: issuer.map(str::to_string),
            disabled: false,
        })
    }

    /// Validate a bearer token. When disabled, always `Valid` (P8) — the
    /// caller is responsible for logging the startup WARN exactly once.
    pub fn validate(&self, token: &str) -> ValidationOutcome {
        let Some(decoding_key) = &self.decoding_key else {
            return ValidationOutcome::Valid;
        };

        let header = match jsonwebtoken::decode_header(token) {
            Ok(h) => h,
            Err(_) => {
                return ValidationOutcome::Invalid(JwtValidationReason::Malformed(
                    "unparseable header".to_string(),
                ))
            }
        };

        let alg = header.alg;
        let allowed_here: Vec<Algorithm> = self
            .algorithms
            .iter()
            .copied()
            .filter(|a| ALWAYS_ALLOWED.contains(a) || SYMMETRIC_ALLOWED.contains(a))
            .collect();
        if !allowed_here.contains(&alg) {
            return ValidationOutcome::Invalid(JwtValidationReason::DisallowedAlgorithm);
        }

        let mut validation = Validation::new(alg);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp"]);
        if let Some(aud) = &self.audience {
            validation.set_audience(&[aud]);
        } else {
            validation.validate_aud = false;
        }
        if let Some(iss) = &self.issuer {
            validation.set_issuer(&[iss]);
        }

        match jsonwebtoken::decode::<serde_json::Value>(token, decoding_key, &validation) {
            Ok(_) => ValidationOutcome::Valid,
            Err(e) => ValidationOutcome::Invalid(map_jsonwebtoken_error(e.into_kind())),
        }
    }
}

fn parse_algorithm(s: &str) -> Option<Algorithm> {
    match s.to_ascii_uppercase().as_str() {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "HS256" => Some(Algorithm::HS256),
        "HS384" => Some(Algorithm::HS384),
        "HS512" => Some(Algorithm::HS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        _ => None,
    }
}

fn map_jsonwebtoken_error(kind: jsonwebtoken::errors::ErrorKind) -> JwtValidationReason {
    use jsonwebtoken::errors::ErrorKind;
    match kind {
        ErrorKind::ExpiredSignature => JwtValidationReason::Expired,
        ErrorKind::ImmatureSignature => JwtValidationReason::NotYetValid,
        ErrorKind::InvalidAudience => JwtValidationReason::AudienceMismatch,
        ErrorKind::InvalidIssuer => JwtValidationReason::IssuerMismatch,
        ErrorKind::InvalidSignature => JwtValidationReason::BadSignature,
        ErrorKind::InvalidAlgorithm => JwtValidationReason::DisallowedAlgorithm,
        other => JwtValidationReason::Malformed(format!("{other:?}")),
    }
}

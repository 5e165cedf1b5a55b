//! End-to-end sign/verify coverage for `JwtValidator` (spec §4.3), using
//! HS256 tokens constructed at runtime rather than a hardcoded RSA PEM
//! fixture (see the comment on `src/jwt.rs`'s `malformed_token_is_invalid_when_enabled`).

use dicomweb_oauth_broker::error::JwtValidationReason;
use dicomweb_oauth_broker::jwt::{JwtValidator, ValidationOutcome};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn sign(alg: Algorithm, secret: &str, claims: serde_json::Value) -> String {
    encode(&Header::new(alg), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

const SECRET: &str = "shared-broker-secret";

#[test]
fn valid_hs256_token_passes() {
    let validator =
        JwtValidator::from_config(Some("placeholder"), &["HS256".to_string()], None, None, Some(SECRET))
            .unwrap();
    let token = sign(Algorithm::HS256, SECRET, json!({ "sub": "host-server", "exp": unix_now() + 300 }));
    assert_eq!(validator.validate(&token), ValidationOutcome::Valid);
}

#[test]
fn wrong_secret_is_rejected_as_bad_signature() {
    let validator =
        JwtValidator::from_config(Some("placeholder"), &["HS256".to_string()], None, None, Some(SECRET))
            .unwrap();
    let token = sign(Algorithm::HS256, "a-different-secret", json!({ "exp": unix_now() + 300 }));
    assert_eq!(
        validator.validate(&token),
        ValidationOutcome::Invalid(JwtValidationReason::BadSignature)
    );
}

#[test]
fn expired_token_is_rejected() {
    let validator =
        JwtValidator::from_config(Some("placeholder"), &["HS256".to_string()], None, None, Some(SECRET))
            .unwrap();
    let token = sign(Algorithm::HS256, SECRET, json!({ "exp": unix_now() - 60 }));
    assert_eq!(
        validator.validate(&token),
        ValidationOutcome::Invalid(JwtValidationReason::Expired)
    );
}

#[test]
fn not_yet_valid_token_is_rejected() {
    let validator =
        JwtValidator::from_config(Some("placeholder"), &["HS256".to_string()], None, None, Some(SECRET))
            .unwrap();
    let token = sign(
        Algorithm::HS256,
        SECRET,
        json!({ "exp": unix_now() + 600, "nbf": unix_now() + 300 }),
    );
    assert_eq!(
        validator.validate(&token),
        ValidationOutcome::Invalid(JwtValidationReason::NotYetValid)
    );
}

#[test]
fn audience_mismatch_is_rejected() {
    let validator = JwtValidator::from_config(
        Some("placeholder"),
        &["HS256".to_string()],
        Some("dicomweb-broker"),
        None,
        Some(SECRET),
    )
    .unwrap();
    let token = sign(
        Algorithm::HS256,
        SECRET,
        json!({ "exp": unix_now() + 300, "aud": "some-other-audience" }),
    );
    assert_eq!(
        validator.validate(&token),
        ValidationOutcome::Invalid(JwtValidationReason::AudienceMismatch)
    );
}

#[test]
fn issuer_mismatch_is_rejected() {
    let validator = JwtValidator::from_config(
        Some("placeholder"),
        &["HS256".to_string()],
        None,
        Some("https://idp.example.com/"),
        Some(SECRET),
    )
    .unwrap();
    let token = sign(
        Algorithm::HS256,
        SECRET,
        json!({ "exp": unix_now() + 300, "iss": "https://some-other-idp.example.com/" }),
    );
    assert_eq!(
        validator.validate(&token),
        ValidationOutcome::Invalid(JwtValidationReason::IssuerMismatch)
    );
}

#[test]
fn algorithm_outside_the_configured_allow_list_is_rejected() {
    // The validator only permits HS256; a token signed HS384 must be
    // rejected by the allow-list check before signature verification is
    // even attempted (which would fail anyway, since the key material here
    // is only valid for HS256 use).
    let validator =
        JwtValidator::from_config(Some("placeholder"), &["HS256".to_string()], None, None, Some(SECRET))
            .unwrap();
    let token = sign(Algorithm::HS384, SECRET, json!({ "exp": unix_now() + 300 }));
    assert_eq!(
        validator.validate(&token),
        ValidationOutcome::Invalid(JwtValidationReason::DisallowedAlgorithm)
    );
}

#[test]
fn disabled_mode_skips_validation_entirely() {
    let validator = JwtValidator::from_config(None, &["RS256".to_string()], None, None, None).unwrap();
    assert!(validator.disabled);
    assert_eq!(validator.validate("not-a-jwt-at-all"), ValidationOutcome::Valid);
}

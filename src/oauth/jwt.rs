//! Diagnostic-only JWT inspection.
//!
//! Upstream access tokens are JWTs whose payload carries the tenant the grant
//! was issued for. Tenant context used by the gateway always comes from the
//! token response; this decoder exists for operators and never drives
//! control flow. Signatures are NOT verified.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("malformed jwt: {0}")]
    Malformed(#[from] jsonwebtoken::errors::Error),
}

/// Claims surfaced for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct JwtClaims {
    pub algorithm: String,
    pub subject: Option<String>,
    /// `Location` or `Company` grants.
    pub auth_class: Option<String>,
    pub auth_class_id: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

pub fn decode_claims(token: &str) -> Result<JwtClaims, JwtError> {
    let header = decode_header(token)?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<serde_json::Value>(token, &DecodingKey::from_secret(&[]), &validation)?;
    let raw = data.claims;

    let text = |key: &str| raw.get(key).and_then(|v| v.as_str()).map(String::from);
    let timestamp = |key: &str| {
        raw.get(key)
            .and_then(|v| v.as_i64())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    };

    Ok(JwtClaims {
        algorithm: format!("{:?}", header.alg),
        subject: text("sub"),
        auth_class: text("authClass"),
        auth_class_id: text("authClassId"),
        issued_at: timestamp("iat"),
        expires_at: timestamp("exp"),
        raw: raw.clone(),
    })
}

//! Identity verification.
//!
//! Callers authenticate with `Authorization: Bearer <identity token>`. The
//! token is checked by an [`IdentityVerifier`], which yields the stable user
//! id that linked credentials are stored under.

use std::str::FromStr;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{LinkError, Result};
use crate::linking::config::IdentityConfig;

/// Validates an identity credential and returns the user id it belongs to.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<String>;
}

/// Extract the bearer token from request headers.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Claims read from an identity token.
#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: Option<String>,
    /// Firebase ID tokens carry the uid here as well as in `sub`.
    user_id: Option<String>,
}

/// Verifies identity tokens as signed JWTs.
pub struct JwtIdentityVerifier {
    /// `None` when no key is configured; every credential is then rejected.
    key: Option<DecodingKey>,
    validation: Validation,
}

impl JwtIdentityVerifier {
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        let algorithm = Algorithm::from_str(&config.jwt_algorithm).map_err(|_| {
            LinkError::NotConfigured(format!(
                "Identity verifier (unsupported algorithm {})",
                config.jwt_algorithm
            ))
        })?;

        let key = match config.jwt_key.as_deref() {
            Some(key_data) => Some(decoding_key(key_data, algorithm)?),
            None => {
                tracing::warn!("IDENTITY_JWT_KEY not set, all identity credentials will be rejected");
                None
            }
        };

        let mut validation = Validation::new(algorithm);
        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match config.audience {
            Some(ref audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self { key, validation })
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, credential: &str) -> Result<String> {
        let key = self.key.as_ref().ok_or(LinkError::Unauthenticated)?;

        let data = decode::<IdentityClaims>(credential, key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Identity token rejected");
            LinkError::Unauthenticated
        })?;

        data.claims
            .user_id
            .or(data.claims.sub)
            .filter(|uid| !uid.is_empty())
            .ok_or(LinkError::Unauthenticated)
    }
}

fn decoding_key(key_data: &str, algorithm: Algorithm) -> Result<DecodingKey> {
    let invalid = |kind: &str| LinkError::NotConfigured(format!("Identity verifier ({} key)", kind));

    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Ok(DecodingKey::from_secret(key_data.as_bytes()))
        }
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => {
            DecodingKey::from_rsa_pem(key_data.as_bytes()).map_err(|_| invalid("RSA"))
        }
        Algorithm::ES256 | Algorithm::ES384 => {
            DecodingKey::from_ec_pem(key_data.as_bytes()).map_err(|_| invalid("EC"))
        }
        Algorithm::EdDSA => {
            DecodingKey::from_ed_pem(key_data.as_bytes()).map_err(|_| invalid("EdDSA"))
        }
    }
}

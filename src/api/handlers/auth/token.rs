//! Signed bearer tokens for access and refresh credentials.
//!
//! Both kinds share one codec and one claim shape; they differ only in the
//! `kind` claim and the configured TTL. Access tokens are verified purely by
//! signature and expiry; refresh tokens are additionally checked against the
//! persisted hash table so they can be revoked before their natural expiry.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::principal::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct Claims {
    /// Subject principal id, stringified.
    pub(crate) sub: String,
    pub(crate) role: Role,
    pub(crate) kind: TokenKind,
    /// Random unique token id.
    pub(crate) jti: String,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
}

impl Claims {
    pub(crate) fn subject_id(&self) -> Result<i64, TokenError> {
        self.sub.parse::<i64>().map_err(|_| TokenError::Invalid)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum TokenError {
    /// Bad signature, wrong algorithm, or a missing required claim.
    #[error("Invalid token.")]
    Invalid,
    #[error("Token has expired.")]
    Expired,
    /// Well-formed token presented for the wrong purpose.
    #[error("Invalid token type.")]
    KindMismatch,
}

pub(crate) struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenCodec {
    pub(crate) fn new(
        secret: &SecretString,
        algorithm: Algorithm,
        access_ttl_seconds: i64,
        refresh_ttl_seconds: i64,
    ) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            algorithm,
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    pub(crate) const fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    const fn ttl_seconds(&self, kind: TokenKind) -> i64 {
        match kind {
            TokenKind::Access => self.access_ttl_seconds,
            TokenKind::Refresh => self.refresh_ttl_seconds,
        }
    }

    /// Sign a fresh token for `subject_id` and return it with its claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the token id cannot be generated or signing fails;
    /// both are server faults, not caller mistakes.
    pub(crate) fn issue(
        &self,
        subject_id: i64,
        role: Role,
        kind: TokenKind,
    ) -> Result<(String, Claims)> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: subject_id.to_string(),
            role,
            kind,
            jti: generate_token_id()?,
            iat: now,
            exp: now + self.ttl_seconds(kind),
        };
        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .context("failed to sign token")?;
        Ok((token, claims))
    }

    /// Verify signature, expiry, required claims, and the token kind.
    pub(crate) fn verify(&self, raw: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation.leeway = 0;

        let data = decode::<Claims>(raw, &self.decoding, &validation).map_err(|err| {
            match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;

        if data.claims.kind != expected {
            return Err(TokenError::KindMismatch);
        }

        Ok(data.claims)
    }
}

/// Random 24-byte token id, URL-safe base64 without padding. The id only has
/// to be unique, it carries no structure.
fn generate_token_id() -> Result<String> {
    let mut bytes = [0u8; 24];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token id")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

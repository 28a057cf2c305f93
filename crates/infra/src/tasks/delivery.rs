//! Verification of push-queue deliveries.
//!
//! The push service signs every callback with an HS256 JWT carried in the
//! `Upstash-Signature` header. The claims bind the token to our callback URL
//! and to a SHA-256 digest of the exact request body, so a valid token cannot
//! be replayed with a different task.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "upstash-signature";

const ISSUER: &str = "Upstash";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery signature is missing")]
    MissingSignature,

    #[error("delivery signature is invalid: {0}")]
    InvalidSignature(String),

    #[error("delivery signature does not cover this request body")]
    BodyMismatch,
}

/// Claims of a delivery signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryClaims {
    pub iss: String,
    /// Callback URL the delivery was addressed to.
    pub sub: String,
    pub exp: i64,
    pub nbf: i64,
    /// Base64url SHA-256 of the request body.
    pub body: String,
}

impl DeliveryClaims {
    pub fn for_body(callback_url: impl Into<String>, body: &[u8], nbf: i64, exp: i64) -> Self {
        Self {
            iss: ISSUER.to_string(),
            sub: callback_url.into(),
            exp,
            nbf,
            body: body_digest(body),
        }
    }
}

pub fn body_digest(body: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(body))
}

/// Checks delivery signatures against the current and, during key rotation,
/// the next signing key.
#[derive(Clone)]
pub struct DeliveryVerifier {
    keys: Vec<Vec<u8>>,
    callback_url: String,
}

impl std::fmt::Debug for DeliveryVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryVerifier")
            .field("callback_url", &self.callback_url)
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl DeliveryVerifier {
    pub fn new(signing_key: impl Into<String>, callback_url: impl Into<String>) -> Self {
        Self {
            keys: vec![signing_key.into().into_bytes()],
            callback_url: callback_url.into(),
        }
    }

    pub fn with_next_key(mut self, signing_key: impl Into<String>) -> Self {
        self.keys.push(signing_key.into().into_bytes());
        self
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// Accept `body` only when `signature` was issued for it by the push service.
    pub fn verify(&self, signature: Option<&str>, body: &[u8]) -> Result<DeliveryClaims, DeliveryError> {
        let token = signature
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(DeliveryError::MissingSignature)?;

        let mut last_error = DeliveryError::MissingSignature;
        for key in &self.keys {
            match self.verify_with(key, token, body) {
                Ok(claims) => return Ok(claims),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    fn verify_with(&self, key: &[u8], token: &str, body: &[u8]) -> Result<DeliveryClaims, DeliveryError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);
        validation.validate_nbf = true;
        validation.sub = Some(self.callback_url.clone());

        let data = jsonwebtoken::decode::<DeliveryClaims>(token, &DecodingKey::from_secret(key), &validation)
            .map_err(|e| DeliveryError::InvalidSignature(e.to_string()))?;

        if data.claims.body.trim_end_matches('=') != body_digest(body) {
            return Err(DeliveryError::BodyMismatch);
        }
        Ok(data.claims)
    }
}

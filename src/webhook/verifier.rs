use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::Signature;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::keys::{KeyCache, KeySource, VerificationKey};
use crate::clock::Clock;

/// The only signing algorithm the provider uses for webhooks.
pub const EXPECTED_ALGORITHM: &str = "ES256";

/// Why a signature token was rejected. Logged, never returned to the sender.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum VerificationError {
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("unsupported token algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    #[error("token header has no key id")]
    MissingKeyId,
    #[error("unknown verification key {0}")]
    UnknownKey(String),
    #[error("verification key {0} has expired")]
    KeyExpired(String),
    #[error("failed to fetch verification key {key_id}: {message}")]
    KeyFetch { key_id: String, message: String },
    #[error("token signature does not match")]
    BadSignature,
    #[error("token issued {skew_secs}s away from now")]
    OutsideFreshnessWindow { skew_secs: u64 },
    #[error("request body digest does not match token")]
    BodyHashMismatch,
}

/// Uniform verification failure. Its message never says which check failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("webhook verification failed")]
pub struct VerificationFailure {
    reason: VerificationError,
}

impl VerificationFailure {
    pub fn reason(&self) -> &VerificationError {
        &self.reason
    }
}

impl From<VerificationError> for VerificationFailure {
    fn from(reason: VerificationError) -> Self {
        Self { reason }
    }
}

/// Facts established about a successfully verified delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub key_id: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    iat: i64,
    request_body_sha256: String,
}

pub struct WebhookVerifier {
    cache: Arc<KeyCache>,
    source: Arc<dyn KeySource>,
    clock: Arc<dyn Clock>,
    max_token_age: Duration,
}

impl WebhookVerifier {
    pub fn new(
        cache: Arc<KeyCache>,
        source: Arc<dyn KeySource>,
        clock: Arc<dyn Clock>,
        max_token_age: Duration,
    ) -> Self {
        Self {
            cache,
            source,
            clock,
            max_token_age,
        }
    }

    /// Verify that `token` was issued by the provider for exactly `raw_body`.
    pub async fn verify(
        &self,
        raw_body: &[u8],
        token: &str,
    ) -> Result<VerifiedToken, VerificationFailure> {
        match self.check(raw_body, token).await {
            Ok(verified) => Ok(verified),
            Err(reason) => {
                tracing::warn!(error = %reason, "Rejected webhook signature");
                Err(reason.into())
            }
        }
    }

    async fn check(
        &self,
        raw_body: &[u8],
        token: &str,
    ) -> Result<VerifiedToken, VerificationError> {
        let mut parts = token.trim().split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(VerificationError::MalformedToken(
                "expected three dot-separated segments".to_string(),
            ));
        };

        let header: TokenHeader = decode_segment(header_b64, "header")?;
        if header.alg != EXPECTED_ALGORITHM {
            return Err(VerificationError::UnsupportedAlgorithm(header.alg));
        }
        let key_id = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or(VerificationError::MissingKeyId)?;

        let key = self.resolve_key(&key_id).await?;

        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| {
                VerificationError::MalformedToken("signature is not base64url".to_string())
            })?;
        let signature =
            Signature::from_slice(&signature_bytes).map_err(|_| VerificationError::BadSignature)?;
        let signing_input = &token.trim()[..header_b64.len() + 1 + claims_b64.len()];
        key.verifying_key()
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| VerificationError::BadSignature)?;

        let claims: TokenClaims = decode_segment(claims_b64, "claims")?;

        let now = self.clock.now();
        let skew_secs = now.timestamp().abs_diff(claims.iat);
        if skew_secs > self.max_token_age.as_secs() {
            return Err(VerificationError::OutsideFreshnessWindow { skew_secs });
        }
        let issued_at = DateTime::from_timestamp(claims.iat, 0)
            .ok_or_else(|| VerificationError::MalformedToken("iat out of range".to_string()))?;

        let body_digest = hex::encode(Sha256::digest(raw_body));
        let matches: bool = body_digest
            .as_bytes()
            .ct_eq(claims.request_body_sha256.as_bytes())
            .into();
        if !matches {
            return Err(VerificationError::BodyHashMismatch);
        }

        Ok(VerifiedToken { key_id, issued_at })
    }

    async fn resolve_key(&self, key_id: &str) -> Result<VerificationKey, VerificationError> {
        if let Some(key) = self.cache.get(key_id) {
            return Ok(key);
        }

        let fetched = self
            .source
            .fetch_key(key_id)
            .await
            .map_err(|err| VerificationError::KeyFetch {
                key_id: key_id.to_string(),
                message: format!("{err:#}"),
            })?
            .ok_or_else(|| VerificationError::UnknownKey(key_id.to_string()))?;

        if fetched.is_expired(self.clock.now()) {
            return Err(VerificationError::KeyExpired(key_id.to_string()));
        }
        self.cache.insert(fetched.clone());
        tracing::info!(
            key_id,
            expires_at = ?fetched.expires_at(),
            "Cached webhook verification key"
        );
        Ok(fetched)
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(
    segment: &str,
    what: &str,
) -> Result<T, VerificationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| VerificationError::MalformedToken(format!("{what} is not base64url")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerificationError::MalformedToken(format!("invalid {what}: {e}")))
}

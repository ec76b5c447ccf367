use anyhow::{Context, Result};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use super::{PlaidClient, ProviderError};
use crate::webhook::{KeySource, VerificationKey};

#[derive(Debug, Deserialize)]
struct PlaidJwk {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    crv: Option<String>,
    kid: String,
    #[serde(default)]
    kty: Option<String>,
    x: String,
    y: String,
    #[serde(default)]
    expired_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VerificationKeyResponse {
    key: PlaidJwk,
}

impl PlaidJwk {
    fn into_key(self) -> Result<VerificationKey> {
        if let Some(kty) = self.kty.as_deref() {
            anyhow::ensure!(kty == "EC", "Unsupported verification key type {kty}");
        }
        if let Some(crv) = self.crv.as_deref() {
            anyhow::ensure!(crv == "P-256", "Unsupported verification key curve {crv}");
        }
        if let Some(alg) = self.alg.as_deref() {
            anyhow::ensure!(alg == "ES256", "Unsupported verification key algorithm {alg}");
        }

        let expires_at = match self.expired_at {
            Some(ts) => Some(
                DateTime::from_timestamp(ts, 0)
                    .with_context(|| format!("Invalid expired_at timestamp {ts}"))?,
            ),
            None => None,
        };

        VerificationKey::from_coordinates(self.kid, &self.x, &self.y, expires_at)
    }
}

/// Plaid reports an unknown key id as an invalid-input error.
fn is_unknown_key(err: &ProviderError) -> bool {
    match err {
        ProviderError::Api {
            status, error_code, ..
        } => *status == 404 || error_code.contains("KEY_ID") || error_code == "INVALID_FIELD",
        _ => false,
    }
}

#[async_trait::async_trait]
impl KeySource for PlaidClient {
    async fn fetch_key(&self, key_id: &str) -> Result<Option<VerificationKey>> {
        #[derive(Serialize)]
        struct Request<'a> {
            client_id: &'a str,
            secret: &'a str,
            key_id: &'a str,
        }

        let response: Result<VerificationKeyResponse, ProviderError> = self
            .request(
                "/webhook_verification_key/get",
                &Request {
                    client_id: self.client_id(),
                    secret: self.secret(),
                    key_id,
                },
            )
            .await;

        match response {
            Ok(response) => {
                anyhow::ensure!(
                    response.key.kid == key_id,
                    "Requested verification key {key_id} but received {}",
                    response.key.kid
                );
                response.key.into_key().map(Some)
            }
            Err(err) if is_unknown_key(&err) => Ok(None),
            Err(err) => Err(err).context("Failed to fetch webhook verification key"),
        }
    }
}

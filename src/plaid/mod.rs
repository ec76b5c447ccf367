//! Plaid API client.
//!
//! Covers the two endpoints this crate needs: paginated transaction listing
//! and webhook verification key distribution.

mod keys;
mod transactions;

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::PlaidConfig;

const PLAID_SANDBOX_BASE: &str = "https://sandbox.plaid.com";
const PLAID_DEVELOPMENT_BASE: &str = "https://development.plaid.com";
const PLAID_PRODUCTION_BASE: &str = "https://production.plaid.com";

/// Error codes meaning the item's access token cannot be used as-is.
const CREDENTIAL_ERROR_CODES: [&str; 5] = [
    "INVALID_ACCESS_TOKEN",
    "ITEM_LOGIN_REQUIRED",
    "ITEM_NOT_FOUND",
    "ACCESS_NOT_GRANTED",
    "INVALID_API_KEYS",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlaidEnvironment {
    Sandbox,
    Development,
    Production,
}

impl PlaidEnvironment {
    fn base_url(self) -> &'static str {
        match self {
            Self::Sandbox => PLAID_SANDBOX_BASE,
            Self::Development => PLAID_DEVELOPMENT_BASE,
            Self::Production => PLAID_PRODUCTION_BASE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Self::Sandbox),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => anyhow::bail!(
                "Invalid Plaid environment: {other}. Expected sandbox, development, or production."
            ),
        }
    }
}

/// A failed Plaid call.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Plaid API request failed ({status}): {error_type}/{error_code}: {message}")]
    Api {
        status: u16,
        error_type: String,
        error_code: String,
        message: String,
    },
    #[error("Plaid HTTP request failed: {0}")]
    Transport(String),
    #[error("Plaid request timed out")]
    Timeout,
    #[error("Failed to parse Plaid JSON response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// True when the failure is caused by a missing, revoked or invalid
    /// credential and retrying cannot help.
    pub fn is_credential_error(&self) -> bool {
        match self {
            Self::Api { error_code, .. } => CREDENTIAL_ERROR_CODES.contains(&error_code.as_str()),
            _ => false,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Api { error_code, .. } => Some(error_code),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlaidErrorBody {
    #[serde(default)]
    error_type: String,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

/// Plaid API client.
pub struct PlaidClient {
    client_id: SecretString,
    secret: SecretString,
    environment: PlaidEnvironment,
    base_url: String,
    client: Client,
}

impl PlaidClient {
    pub fn new(
        client_id: SecretString,
        secret: SecretString,
        environment: PlaidEnvironment,
    ) -> Self {
        Self {
            client_id,
            secret,
            environment,
            base_url: environment.base_url().to_string(),
            client: Client::new(),
        }
    }

    /// Build a client from configuration, requiring API keys to be present.
    pub fn from_config(config: &PlaidConfig) -> Result<Self> {
        let client_id = config
            .client_id
            .clone()
            .context("Missing Plaid client id (set plaid.client_id or SPENDSYNC_PLAID_CLIENT_ID)")?;
        let secret = config
            .secret
            .clone()
            .context("Missing Plaid secret (set plaid.secret or SPENDSYNC_PLAID_SECRET)")?;

        let mut client = Self::new(
            SecretString::from(client_id),
            SecretString::from(secret),
            config.environment,
        )
        .with_timeout(config.request_timeout)?;
        if let Some(base_url) = &config.base_url {
            client = client.with_base_url(base_url.clone());
        }
        Ok(client)
    }

    /// Override API base URL (useful for tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Bound every request; a hung upstream call surfaces as a timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Plaid HTTP client")?;
        Ok(self)
    }

    pub fn environment(&self) -> PlaidEnvironment {
        self.environment
    }

    async fn request<T: for<'de> Deserialize<'de>, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body_text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let parsed: Option<PlaidErrorBody> = serde_json::from_str(&body_text).ok();
            return Err(match parsed {
                Some(err) if !err.error_code.is_empty() => ProviderError::Api {
                    status: status.as_u16(),
                    error_type: err.error_type,
                    error_code: err.error_code,
                    message: err.error_message,
                },
                _ => ProviderError::Api {
                    status: status.as_u16(),
                    error_type: "UNKNOWN".to_string(),
                    error_code: format!("HTTP_{}", status.as_u16()),
                    message: body_text,
                },
            });
        }

        serde_json::from_str(&body_text).map_err(|e| ProviderError::Decode(e.to_string()))
    }

    fn client_id(&self) -> &str {
        self.client_id.expose_secret()
    }

    fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(err.to_string())
    }
}

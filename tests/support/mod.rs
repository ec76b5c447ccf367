#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use secrecy::SecretString;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use spendsync::app::{App, AppComponents};
use spendsync::clock::Clock;
use spendsync::config::{
    AggregationConfig, PlaidConfig, ReconciliationConfig, ResolvedConfig, RetryConfig,
    WebhookConfig,
};
use spendsync::models::{Id, SpendingStatistics};
use spendsync::plaid::{PlaidClient, PlaidEnvironment};
use spendsync::storage::Storage;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const KEY_ID: &str = "6c5516e1-92dc-479e-a8ff-5a51992e0001";

/// "Today" for the integration scenarios.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap()
}

pub fn signing_key() -> SigningKey {
    SigningKey::from_slice(&[7u8; 32]).unwrap()
}

/// The provider's JWK for [`signing_key`].
pub fn verification_jwk(expired_at: Option<i64>) -> Value {
    let point = signing_key().verifying_key().to_encoded_point(false);
    json!({
        "alg": "ES256",
        "crv": "P-256",
        "kid": KEY_ID,
        "kty": "EC",
        "use": "sig",
        "x": URL_SAFE_NO_PAD.encode(point.x().unwrap()),
        "y": URL_SAFE_NO_PAD.encode(point.y().unwrap()),
        "created_at": 1_700_000_000,
        "expired_at": expired_at,
    })
}

/// Sign `body` the way the provider signs webhook deliveries.
pub fn sign_body(body: &[u8], issued_at: DateTime<Utc>) -> String {
    let header = json!({"alg": "ES256", "kid": KEY_ID, "typ": "JWT"});
    let claims = json!({
        "iat": issued_at.timestamp(),
        "request_body_sha256": hex::encode(Sha256::digest(body)),
    });
    let message = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );
    let signature: Signature = signing_key().sign(message.as_bytes());
    format!("{message}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

pub fn webhook_body(code: &str, item_id: &str) -> Vec<u8> {
    json!({
        "webhook_type": "TRANSACTIONS",
        "webhook_code": code,
        "item_id": item_id,
        "new_transactions": 4,
        "error": null,
        "environment": "sandbox",
    })
    .to_string()
    .into_bytes()
}

pub fn txn(id: &str, amount: f64, date: &str, category: &[&str]) -> Value {
    json!({
        "transaction_id": id,
        "account_id": "acc-checking",
        "amount": amount,
        "date": date,
        "merchant_name": "Corner Store",
        "category": category,
    })
}

/// The Feb-15 scenario: one January purchase, January payroll, one February
/// purchase and a $1 noise charge.
pub fn scenario_transactions() -> Vec<Value> {
    vec![
        txn("jan-groceries", 40.0, "2026-01-05", &["Shops", "Supermarkets and Groceries"]),
        txn("jan-payroll", -2000.0, "2026-01-01", &["Transfer", "Payroll"]),
        txn("feb-dinner", 60.0, "2026-02-10", &["Food and Drink", "Restaurants"]),
        txn("feb-noise", 1.0, "2026-02-11", &["Service"]),
    ]
}

pub async fn mount_verification_key(server: &MockServer, expired_at: Option<i64>) {
    Mock::given(method("POST"))
        .and(path("/webhook_verification_key/get"))
        .and(body_partial_json(json!({"key_id": KEY_ID})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": verification_jwk(expired_at),
            "request_id": "req-key"
        })))
        .mount(server)
        .await;
}

pub async fn mount_transactions(server: &MockServer, access_token: &str, transactions: Vec<Value>) {
    let total = transactions.len();
    Mock::given(method("POST"))
        .and(path("/transactions/get"))
        .and(body_partial_json(json!({"access_token": access_token})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accounts": [],
            "transactions": transactions,
            "total_transactions": total,
            "request_id": "req-transactions"
        })))
        .mount(server)
        .await;
}

pub fn plaid_client(server: &MockServer) -> PlaidClient {
    PlaidClient::new(
        SecretString::from("test-client".to_string()),
        SecretString::from("test-secret".to_string()),
        PlaidEnvironment::Sandbox,
    )
    .with_base_url(server.uri())
}

pub fn test_config(data_dir: &Path) -> ResolvedConfig {
    ResolvedConfig {
        data_dir: data_dir.to_path_buf(),
        plaid: PlaidConfig::default(),
        aggregation: AggregationConfig::default(),
        webhook: WebhookConfig::default(),
        retry: RetryConfig {
            delays: vec![Duration::from_millis(5)],
            ..RetryConfig::default()
        },
        reconciliation: ReconciliationConfig::default(),
    }
}

pub fn build_app(server: &MockServer, storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> App {
    let plaid = Arc::new(plaid_client(server));
    App::with_components(
        test_config(Path::new(".")),
        AppComponents {
            storage,
            transactions: plaid.clone(),
            keys: plaid,
            clock,
        },
    )
}

/// Poll until a background run has written statistics for `user_id`.
pub async fn wait_for_statistics(
    storage: &dyn Storage,
    user_id: &Id,
) -> Result<Option<SpendingStatistics>> {
    for _ in 0..200 {
        if let Some(stats) = storage.get_statistics(user_id).await? {
            return Ok(Some(stats));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(None)
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use p256::ecdsa::VerifyingKey;
use p256::{EncodedPoint, FieldBytes};

use crate::clock::Clock;

/// A provider-published public key for webhook signatures.
#[derive(Debug, Clone)]
pub struct VerificationKey {
    key_id: String,
    verifying_key: VerifyingKey,
    expires_at: Option<DateTime<Utc>>,
}

impl VerificationKey {
    pub fn new(
        key_id: impl Into<String>,
        verifying_key: VerifyingKey,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            verifying_key,
            expires_at,
        }
    }

    /// Build a P-256 key from base64url JWK `x`/`y` coordinates.
    pub fn from_coordinates(
        key_id: impl Into<String>,
        x: &str,
        y: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let x = decode_coordinate(x).context("Invalid verification key x coordinate")?;
        let y = decode_coordinate(y).context("Invalid verification key y coordinate")?;
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&x),
            FieldBytes::from_slice(&y),
            false,
        );
        let verifying_key =
            VerifyingKey::from_encoded_point(&point).context("Verification key is not on P-256")?;
        Ok(Self::new(key_id, verifying_key, expires_at))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

fn decode_coordinate(value: &str) -> Result<Vec<u8>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .context("Coordinate is not base64url")?;
    anyhow::ensure!(
        bytes.len() == 32,
        "Coordinate must be 32 bytes, got {}",
        bytes.len()
    );
    Ok(bytes)
}

/// Key-distribution boundary.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// `Ok(None)` when the provider does not know `key_id`.
    async fn fetch_key(&self, key_id: &str) -> Result<Option<VerificationKey>>;
}

/// Process-wide cache of verification keys, keyed by key id.
///
/// Expired entries are evicted on read. Concurrent inserts for the same id
/// are last-write-wins.
pub struct KeyCache {
    keys: RwLock<HashMap<String, VerificationKey>>,
    clock: Arc<dyn Clock>,
}

impl KeyCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn get(&self, key_id: &str) -> Option<VerificationKey> {
        let now = self.clock.now();
        {
            let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
            match keys.get(key_id) {
                Some(key) if !key.is_expired(now) => return Some(key.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        if keys.get(key_id).is_some_and(|key| key.is_expired(now)) {
            keys.remove(key_id);
            tracing::debug!(key_id, "Evicted expired verification key");
        }
        None
    }

    /// Cache `key` unless it is already expired. Returns whether it was stored.
    pub fn insert(&self, key: VerificationKey) -> bool {
        if key.is_expired(self.clock.now()) {
            return false;
        }
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(key.key_id.clone(), key);
        true
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

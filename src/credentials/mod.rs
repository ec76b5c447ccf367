//! Credential resolution.
//!
//! Maps a user to the provider access token of their linked connection.
//! How tokens are protected at rest is the storage backend's concern; the
//! resolver only cares whether a usable token exists.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::{CredentialError, PipelineError};
use crate::models::{ConnectionStatus, Id};
use crate::storage::Storage;

/// A decrypted provider credential for one connection.
#[derive(Clone)]
pub struct AccessCredential {
    pub connection_id: Id,
    pub access_token: SecretString,
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessCredential")
            .field("connection_id", &self.connection_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Credential Resolver boundary.
///
/// Unknown users and missing or unusable credentials are reported as
/// [`CredentialError`]s (permanent). Backend failures surface as
/// [`PipelineError::Storage`] and are retried.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, user_id: &Id) -> Result<AccessCredential, PipelineError>;
}

/// Resolves credentials from the connection records in [`Storage`].
pub struct StorageCredentialResolver {
    storage: Arc<dyn Storage>,
}

impl StorageCredentialResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl CredentialResolver for StorageCredentialResolver {
    async fn resolve(&self, user_id: &Id) -> Result<AccessCredential, PipelineError> {
        let connection = self
            .storage
            .find_connection_for_user(user_id)
            .await
            .map_err(PipelineError::Storage)?
            .ok_or_else(|| CredentialError::UserNotFound(user_id.clone()))?;

        let token = connection
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::NoAccessCredential(user_id.clone()))?;

        if connection.status != ConnectionStatus::Active {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %connection.id,
                status = %connection.status,
                "Connection is not active"
            );
            return Err(CredentialError::InvalidAccessCredential(user_id.clone()).into());
        }

        Ok(AccessCredential {
            connection_id: connection.id.clone(),
            access_token: SecretString::from(token.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::Connection;
    use crate::storage::MemoryStorage;
    use secrecy::ExposeSecret;

    async fn resolver_with(connections: Vec<Connection>) -> StorageCredentialResolver {
        let storage = MemoryStorage::new();
        for conn in &connections {
            storage.save_connection(conn).await.unwrap();
        }
        StorageCredentialResolver::new(Arc::new(storage))
    }

    #[tokio::test]
    async fn resolves_active_connection_token() {
        let conn = Connection::new("item-1", "user-1", &SystemClock).with_access_token("access-1");
        let resolver = resolver_with(vec![conn]).await;

        let credential = resolver.resolve(&Id::from("user-1")).await.unwrap();
        assert_eq!(credential.connection_id.as_str(), "item-1");
        assert_eq!(credential.access_token.expose_secret(), "access-1");
        assert!(!format!("{credential:?}").contains("access-1"));
    }

    #[tokio::test]
    async fn classifies_missing_and_unusable_credentials() {
        let resolver = resolver_with(vec![
            Connection::new("item-2", "no-token", &SystemClock),
            Connection::new("item-3", "revoked", &SystemClock)
                .with_access_token("access-3")
                .with_status(ConnectionStatus::PendingReauth),
        ])
        .await;

        let err = resolver.resolve(&Id::from("ghost")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Credential(CredentialError::UserNotFound(_))));
        assert!(err.is_permanent());

        let err = resolver.resolve(&Id::from("no-token")).await.unwrap_err();
        assert_eq!(err.to_string(), "no access credential for user no-token");

        let err = resolver.resolve(&Id::from("revoked")).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Credential(CredentialError::InvalidAccessCredential(_))
        ));
    }
}

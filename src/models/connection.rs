use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::Clock;

use super::Id;

/// Linkage between a user and one provider credential.
///
/// `id` is the provider's identifier for the linked item; webhooks reference
/// a connection by this id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Id,
    pub user_id: Id,
    pub status: ConnectionStatus,
    /// When the user linked this connection.
    pub connected_at: DateTime<Utc>,
    /// Provider access token. Encryption at rest is owned by the store that
    /// produced this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl Connection {
    pub fn new(id: impl Into<Id>, user_id: impl Into<Id>, clock: &dyn Clock) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            status: ConnectionStatus::Active,
            connected_at: clock.now(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_connected_at(mut self, connected_at: DateTime<Utc>) -> Self {
        self.connected_at = connected_at;
        self
    }

    /// True when the connection can be used to call the provider.
    pub fn has_valid_credential(&self) -> bool {
        self.status == ConnectionStatus::Active
            && self
                .access_token
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Error,
    Disconnected,
    PendingReauth,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::PendingReauth => "pending_reauth",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;

    #[test]
    fn new_connection_uses_clock_for_connected_at() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 2, 5, 12, 0, 0).unwrap());
        let conn = Connection::new("item-1", "user-1", &clock);
        assert_eq!(conn.connected_at, clock.now());
        assert_eq!(conn.status, ConnectionStatus::Active);
    }

    #[test]
    fn credential_validity_requires_active_status_and_token() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 2, 5, 12, 0, 0).unwrap());
        let bare = Connection::new("item-1", "user-1", &clock);
        assert!(!bare.has_valid_credential());

        let linked = bare.clone().with_access_token("access-sandbox-1");
        assert!(linked.has_valid_credential());

        let blank = bare.clone().with_access_token("  ");
        assert!(!blank.has_valid_credential());

        let reauth = linked.with_status(ConnectionStatus::PendingReauth);
        assert!(!reauth.has_valid_credential());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionStatus::PendingReauth).unwrap();
        assert_eq!(json, "\"pending_reauth\"");
    }
}

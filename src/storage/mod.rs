mod json_file;
mod memory;

pub use json_file::JsonFileStorage;
pub use memory::MemoryStorage;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Connection, Id, SpendingStatistics};

/// Persistence for provider connections and per-user statistics snapshots.
///
/// Statistics are written only by the aggregation pipeline; an upsert
/// replaces any previous snapshot for the same user.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    // Connections
    async fn list_connections(&self) -> Result<Vec<Connection>>;
    async fn get_connection(&self, id: &Id) -> Result<Option<Connection>>;
    async fn find_connection_for_user(&self, user_id: &Id) -> Result<Option<Connection>>;
    async fn save_connection(&self, conn: &Connection) -> Result<()>;

    // Statistics
    async fn get_statistics(&self, user_id: &Id) -> Result<Option<SpendingStatistics>>;
    async fn upsert_statistics(&self, stats: &SpendingStatistics) -> Result<()>;

    /// Connections made before `connected_before` that hold a usable
    /// credential but have no statistics snapshot yet, oldest first.
    async fn find_stale(&self, connected_before: DateTime<Utc>) -> Result<Vec<Connection>> {
        let mut stale = Vec::new();
        for conn in self.list_connections().await? {
            if conn.connected_at >= connected_before || !conn.has_valid_credential() {
                continue;
            }
            if self.get_statistics(&conn.user_id).await?.is_none() {
                stale.push(conn);
            }
        }
        sort_oldest_first(&mut stale);
        Ok(stale)
    }
}

pub(crate) fn sort_oldest_first(connections: &mut [Connection]) {
    connections.sort_by(|a, b| {
        a.connected_at
            .cmp(&b.connected_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

//! In-memory storage implementation for testing.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::{Connection, Id, SpendingStatistics};

use super::{sort_oldest_first, Storage};

/// In-memory storage for tests and single-process experiments.
pub struct MemoryStorage {
    connections: Mutex<HashMap<Id, Connection>>,
    statistics: Mutex<HashMap<Id, SpendingStatistics>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            statistics: Mutex::new(HashMap::new()),
        }
    }

    pub async fn statistics_count(&self) -> usize {
        self.statistics.lock().await.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn list_connections(&self) -> Result<Vec<Connection>> {
        let conns = self.connections.lock().await;
        Ok(conns.values().cloned().collect())
    }

    async fn get_connection(&self, id: &Id) -> Result<Option<Connection>> {
        let conns = self.connections.lock().await;
        Ok(conns.get(id).cloned())
    }

    async fn find_connection_for_user(&self, user_id: &Id) -> Result<Option<Connection>> {
        let conns = self.connections.lock().await;
        let mut owned: Vec<Connection> = conns
            .values()
            .filter(|c| &c.user_id == user_id)
            .cloned()
            .collect();
        sort_oldest_first(&mut owned);
        // Prefer a usable connection when a user has relinked.
        let usable = owned.iter().position(Connection::has_valid_credential);
        Ok(match usable {
            Some(idx) => Some(owned.swap_remove(idx)),
            None => owned.into_iter().next(),
        })
    }

    async fn save_connection(&self, conn: &Connection) -> Result<()> {
        let mut conns = self.connections.lock().await;
        conns.insert(conn.id.clone(), conn.clone());
        Ok(())
    }

    async fn get_statistics(&self, user_id: &Id) -> Result<Option<SpendingStatistics>> {
        let stats = self.statistics.lock().await;
        Ok(stats.get(user_id).cloned())
    }

    async fn upsert_statistics(&self, stats: &SpendingStatistics) -> Result<()> {
        let mut all = self.statistics.lock().await;
        all.insert(stats.user_id.clone(), stats.clone());
        Ok(())
    }

    async fn find_stale(&self, connected_before: DateTime<Utc>) -> Result<Vec<Connection>> {
        let conns = self.connections.lock().await;
        let stats = self.statistics.lock().await;
        let mut stale: Vec<Connection> = conns
            .values()
            .filter(|c| c.connected_at < connected_before)
            .filter(|c| c.has_valid_credential())
            .filter(|c| !stats.contains_key(&c.user_id))
            .cloned()
            .collect();
        sort_oldest_first(&mut stale);
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn stats_for(user: &str, at: DateTime<Utc>) -> SpendingStatistics {
        SpendingStatistics {
            user_id: Id::from_string(user),
            average_monthly_spending: Decimal::new(25000, 2),
            last_month_spending: Decimal::new(10000, 2),
            two_months_ago_spending: None,
            current_month_spending: Decimal::ZERO,
            last_calculated_at: at,
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_previous_snapshot() -> Result<()> {
        let storage = MemoryStorage::new();
        let at = Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap();

        storage.upsert_statistics(&stats_for("user-1", at)).await?;
        let mut newer = stats_for("user-1", at + Duration::hours(1));
        newer.current_month_spending = Decimal::new(4200, 2);
        storage.upsert_statistics(&newer).await?;

        assert_eq!(storage.statistics_count().await, 1);
        let stored = storage.get_statistics(&Id::from_string("user-1")).await?;
        assert_eq!(stored, Some(newer));
        Ok(())
    }

    #[tokio::test]
    async fn find_stale_skips_recent_unlinked_and_computed() -> Result<()> {
        let now = Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap();
        let clock = FixedClock::new(now);
        let storage = MemoryStorage::new();

        let old = Connection::new("item-old", "user-old", &clock)
            .with_access_token("access-1")
            .with_connected_at(now - Duration::minutes(10));
        let recent = Connection::new("item-recent", "user-recent", &clock)
            .with_access_token("access-2")
            .with_connected_at(now - Duration::minutes(2));
        let unlinked = Connection::new("item-unlinked", "user-unlinked", &clock)
            .with_connected_at(now - Duration::hours(1));
        let computed = Connection::new("item-done", "user-done", &clock)
            .with_access_token("access-3")
            .with_connected_at(now - Duration::hours(2));

        for conn in [&old, &recent, &unlinked, &computed] {
            storage.save_connection(conn).await?;
        }
        storage.upsert_statistics(&stats_for("user-done", now)).await?;

        let stale = storage.find_stale(now - Duration::minutes(5)).await?;
        let ids: Vec<&str> = stale.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["item-old"]);
        Ok(())
    }
}

//! Reconciliation Scanner.
//!
//! Finds connections that have been linked for longer than the grace period
//! but still have no statistics snapshot, and runs the full pipeline for each
//! owning user. This is what makes every connected account converge even
//! when webhooks are lost.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::clock::Clock;
use crate::config::ReconciliationConfig;
use crate::models::{Connection, Id};
use crate::retry::{RetryController, RunOutcome};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationHealth {
    /// Connections with a usable credential and no statistics, regardless of age.
    pub pending: usize,
    /// Pending connections older than the grace period.
    pub overdue: usize,
    pub oldest_pending_connected_at: Option<DateTime<Utc>>,
}

pub struct ReconciliationScanner {
    storage: Arc<dyn Storage>,
    retry: RetryController,
    clock: Arc<dyn Clock>,
    grace_period: Duration,
    concurrency: usize,
}

impl ReconciliationScanner {
    pub fn new(
        storage: Arc<dyn Storage>,
        retry: RetryController,
        clock: Arc<dyn Clock>,
        config: &ReconciliationConfig,
    ) -> Self {
        Self {
            storage,
            retry,
            clock,
            grace_period: config.grace_period,
            concurrency: config.concurrency.max(1),
        }
    }

    fn cutoff(&self) -> Result<DateTime<Utc>> {
        let grace = chrono::Duration::from_std(self.grace_period)
            .context("Reconciliation grace period is too large")?;
        Ok(self.clock.now() - grace)
    }

    /// Connections linked before the grace-period cutoff that still lack
    /// statistics, oldest first.
    pub async fn candidates(&self) -> Result<Vec<Connection>> {
        let cutoff = self.cutoff()?;
        self.storage
            .find_stale(cutoff)
            .await
            .context("Failed to query stale connections")
    }

    /// Run the pipeline for every candidate user. One user's failure never
    /// stops the others.
    pub async fn scan(&self) -> Result<ScanReport> {
        let candidates = self.candidates().await?;
        let users = unique_users(&candidates);
        if users.is_empty() {
            tracing::debug!("Reconciliation found nothing to do");
            return Ok(ScanReport::default());
        }
        tracing::info!(
            candidates = users.len(),
            concurrency = self.concurrency,
            "Reconciling users without statistics"
        );

        let outcomes: Vec<RunOutcome> = stream::iter(users)
            .map(|user_id| {
                let retry = self.retry.clone();
                async move { retry.run_with_retry(&user_id).await }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let report = ScanReport {
            processed: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
        };
        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            "Reconciliation scan finished"
        );
        Ok(report)
    }

    /// Summarize pending work without processing anything.
    pub async fn health(&self) -> Result<ReconciliationHealth> {
        let cutoff = self.cutoff()?;
        let pending = self
            .storage
            .find_stale(self.clock.now())
            .await
            .context("Failed to query pending connections")?;

        Ok(ReconciliationHealth {
            pending: pending.len(),
            overdue: pending.iter().filter(|c| c.connected_at < cutoff).count(),
            oldest_pending_connected_at: pending.first().map(|c| c.connected_at),
        })
    }
}

/// Owning users in candidate order, each once.
fn unique_users(connections: &[Connection]) -> Vec<Id> {
    let mut seen = HashSet::new();
    connections
        .iter()
        .filter(|c| seen.insert(c.user_id.clone()))
        .map(|c| c.user_id.clone())
        .collect()
}

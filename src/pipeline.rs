//! One statistics run for one user: resolve credential, fetch the lookback
//! window, aggregate, persist.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::Clock;
use crate::credentials::CredentialResolver;
use crate::error::PipelineError;
use crate::fetch::TransactionFetcher;
use crate::models::{Id, SpendingStatistics};
use crate::spending::SpendingAggregator;
use crate::storage::Storage;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// A single, self-contained statistics attempt for one user.
#[async_trait]
pub trait StatisticsRunner: Send + Sync {
    async fn run_once(&self, user_id: &Id) -> Result<SpendingStatistics, PipelineError>;
}

pub struct StatisticsPipeline {
    credentials: Arc<dyn CredentialResolver>,
    fetcher: TransactionFetcher,
    aggregator: SpendingAggregator,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl StatisticsPipeline {
    pub fn new(
        credentials: Arc<dyn CredentialResolver>,
        fetcher: TransactionFetcher,
        aggregator: SpendingAggregator,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            fetcher,
            aggregator,
            storage,
            clock,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Run a single attempt. Statistics are written only when every step
    /// succeeds; nothing carries over between attempts.
    pub async fn run(&self, user_id: &Id) -> Result<SpendingStatistics, PipelineError> {
        let credential = self.credentials.resolve(user_id).await?;

        let today = self.clock.today();
        let start_date = self.aggregator.window_start(today);
        let transactions = self
            .fetcher
            .fetch(&credential.access_token, start_date, today)
            .await?;

        let statistics = self
            .aggregator
            .summarize(&transactions, today)
            .into_statistics(user_id.clone(), self.clock.now());

        match tokio::time::timeout(self.store_timeout, self.storage.upsert_statistics(&statistics))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(PipelineError::Storage(err)),
            Err(_) => {
                return Err(PipelineError::Timeout {
                    operation: "statistics upsert",
                    after: self.store_timeout,
                })
            }
        }

        tracing::info!(
            user_id = %user_id,
            connection_id = %credential.connection_id,
            transactions = transactions.len(),
            "Stored spending statistics"
        );
        Ok(statistics)
    }
}

#[async_trait]
impl StatisticsRunner for StatisticsPipeline {
    async fn run_once(&self, user_id: &Id) -> Result<SpendingStatistics, PipelineError> {
        self.run(user_id).await
    }
}

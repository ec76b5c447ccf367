//! Service wiring shared by the CLI and the webhook server.

mod config;
mod types;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::clock::{Clock, SystemClock};
use crate::config::ResolvedConfig;
use crate::credentials::StorageCredentialResolver;
use crate::fetch::{TransactionFetcher, TransactionSource};
use crate::models::{Id, SpendingStatistics};
use crate::pipeline::StatisticsPipeline;
use crate::plaid::PlaidClient;
use crate::reconcile::ReconciliationScanner;
use crate::retry::{RetryController, RunOutcome};
use crate::spending::SpendingAggregator;
use crate::storage::{JsonFileStorage, Storage};
use crate::webhook::{KeyCache, KeySource, WebhookIngress, WebhookRouter, WebhookVerifier};

pub use config::config_output;
pub use types::{HealthOutput, RefreshOutput, ScanOutput};

/// External collaborators the services are built on.
pub struct AppComponents {
    pub storage: Arc<dyn Storage>,
    pub transactions: Arc<dyn TransactionSource>,
    pub keys: Arc<dyn KeySource>,
    pub clock: Arc<dyn Clock>,
}

/// Fully wired pipeline: webhook ingress, retry controller and scanner over
/// one storage backend.
pub struct App {
    config: ResolvedConfig,
    storage: Arc<dyn Storage>,
    retry: RetryController,
    scanner: ReconciliationScanner,
    ingress: WebhookIngress,
}

impl App {
    /// Build from configuration: JSON file storage under the data directory
    /// and the Plaid client for both transactions and verification keys.
    pub fn open(config: ResolvedConfig) -> Result<Self> {
        let plaid = Arc::new(
            PlaidClient::from_config(&config.plaid).context("Failed to configure Plaid client")?,
        );
        let storage: Arc<dyn Storage> = Arc::new(JsonFileStorage::new(&config.data_dir));
        tracing::debug!(
            data_dir = %config.data_dir.display(),
            environment = plaid.environment().as_str(),
            "Opening spendsync"
        );

        Ok(Self::with_components(
            config,
            AppComponents {
                storage,
                transactions: plaid.clone(),
                keys: plaid,
                clock: Arc::new(SystemClock),
            },
        ))
    }

    pub fn with_components(config: ResolvedConfig, components: AppComponents) -> Self {
        let AppComponents {
            storage,
            transactions,
            keys,
            clock,
        } = components;

        let aggregator = SpendingAggregator::from_config(&config.aggregation);
        let fetcher =
            TransactionFetcher::new(transactions, aggregator.filter().clone(), clock.clone());
        let pipeline = StatisticsPipeline::new(
            Arc::new(StorageCredentialResolver::new(storage.clone())),
            fetcher,
            aggregator,
            storage.clone(),
            clock.clone(),
        )
        .with_store_timeout(config.retry.store_timeout);

        let retry = RetryController::new(Arc::new(pipeline), &config.retry);
        let scanner = ReconciliationScanner::new(
            storage.clone(),
            retry.clone(),
            clock.clone(),
            &config.reconciliation,
        );

        let verifier = WebhookVerifier::new(
            Arc::new(KeyCache::new(clock.clone())),
            keys,
            clock,
            config.webhook.max_token_age,
        );
        let router = WebhookRouter::new(storage.clone(), Arc::new(retry.clone()));

        Self {
            config,
            storage,
            retry,
            scanner,
            ingress: WebhookIngress::new(verifier, router),
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    pub fn scanner(&self) -> &ReconciliationScanner {
        &self.scanner
    }

    pub fn ingress(&self) -> &WebhookIngress {
        &self.ingress
    }

    /// Run the pipeline for one user in the foreground, retries included.
    pub async fn refresh(&self, user_id: &Id) -> RunOutcome {
        self.retry.run_with_retry(user_id).await
    }

    pub async fn statistics(&self, user_id: &Id) -> Result<Option<SpendingStatistics>> {
        self.storage.get_statistics(user_id).await
    }
}

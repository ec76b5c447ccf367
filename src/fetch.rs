//! Transaction Fetcher: pages through the provider's transaction listing and
//! hands back pre-filtered spending records.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::SecretString;

use crate::clock::Clock;
use crate::error::FetchError;
use crate::models::{ProcessedTransaction, Transaction};
use crate::plaid::ProviderError;
use crate::spending::SpendingFilter;

/// Provider maximum page size for transaction listing.
pub const PAGE_SIZE: usize = 500;

/// Upper bound on pages per fetch; a provider that keeps reporting a larger
/// total than it delivers would otherwise loop forever.
pub const MAX_PAGES: usize = 200;

/// One page of the provider's transaction listing.
#[derive(Debug, Clone, Default)]
pub struct TransactionPage {
    /// Records that survived conversion.
    pub transactions: Vec<Transaction>,
    /// Raw records on the page, including ones dropped as malformed.
    pub received: usize,
    /// Provider-reported total for the whole date range.
    pub total: usize,
}

/// Paginated transaction listing.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn list_transactions(
        &self,
        access_token: &SecretString,
        start_date: NaiveDate,
        end_date: NaiveDate,
        offset: usize,
        count: usize,
    ) -> Result<TransactionPage, ProviderError>;
}

pub struct TransactionFetcher {
    source: Arc<dyn TransactionSource>,
    filter: SpendingFilter,
    clock: Arc<dyn Clock>,
    page_size: usize,
    max_pages: usize,
}

impl TransactionFetcher {
    pub fn new(
        source: Arc<dyn TransactionSource>,
        filter: SpendingFilter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            filter,
            clock,
            page_size: PAGE_SIZE,
            max_pages: MAX_PAGES,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Fetch every transaction in `[start_date, end_date]` and filter it down
    /// to spending. An end date after today is clamped to today.
    pub async fn fetch(
        &self,
        access_token: &SecretString,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<ProcessedTransaction>, FetchError> {
        let today = self.clock.today();
        let end_date = end_date.min(today);
        if start_date > end_date {
            tracing::debug!(%start_date, %end_date, "Empty fetch window");
            return Ok(Vec::new());
        }

        let mut transactions = Vec::new();
        let mut offset = 0usize;
        let mut pages = 0usize;
        loop {
            if pages >= self.max_pages {
                return Err(FetchError::Transient(format!(
                    "pagination did not converge after {pages} pages ({offset} records)"
                )));
            }

            let page = self
                .source
                .list_transactions(access_token, start_date, end_date, offset, self.page_size)
                .await
                .map_err(classify)?;
            pages += 1;
            offset += page.received;
            transactions.extend(page.transactions);

            tracing::debug!(
                page = pages,
                received = page.received,
                accumulated = offset,
                total = page.total,
                "Fetched transaction page"
            );

            if page.received == 0 || offset >= page.total {
                break;
            }
        }

        let processed = self.filter.process(&transactions);
        tracing::info!(
            %start_date,
            %end_date,
            fetched = transactions.len(),
            spending = processed.len(),
            "Fetched transactions"
        );
        Ok(processed)
    }
}

fn classify(err: ProviderError) -> FetchError {
    tracing::debug!(
        error_code = err.error_code().unwrap_or("none"),
        credential = err.is_credential_error(),
        "Classifying provider error"
    );
    if err.is_credential_error() {
        FetchError::Permanent(err.to_string())
    } else {
        FetchError::Transient(err.to_string())
    }
}

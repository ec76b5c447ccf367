use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{PlaidClient, ProviderError};
use crate::fetch::{TransactionPage, TransactionSource};
use crate::models::Transaction;

#[derive(Debug, Deserialize)]
struct PlaidTransaction {
    transaction_id: Option<String>,
    #[serde(default)]
    account_id: Option<String>,
    amount: Option<f64>,
    date: Option<String>,
    #[serde(default)]
    merchant_name: Option<String>,
    #[serde(default)]
    category: Option<Vec<String>>,
    #[serde(default)]
    personal_finance_category: Option<PersonalFinanceCategory>,
}

#[derive(Debug, Deserialize)]
struct PersonalFinanceCategory {
    primary: Option<String>,
    detailed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionsGetResponse {
    #[serde(default)]
    transactions: Vec<serde_json::Value>,
    total_transactions: usize,
}

impl PlaidTransaction {
    fn into_transaction(self) -> Option<Transaction> {
        let id = self.transaction_id.filter(|id| !id.is_empty())?;
        let amount = self.amount.filter(|a| a.is_finite())?;
        let amount = Decimal::from_str(&amount.to_string()).ok()?;
        let date = NaiveDate::parse_from_str(self.date.as_deref()?, "%Y-%m-%d").ok()?;

        let category = match self.category {
            Some(category) if !category.is_empty() => category,
            _ => self
                .personal_finance_category
                .map(|pfc| pfc.primary.into_iter().chain(pfc.detailed).collect())
                .unwrap_or_default(),
        };

        let mut tx = Transaction::new(id, amount, date)
            .with_category(category)
            .with_account(self.account_id.unwrap_or_default());
        if let Some(merchant) = self.merchant_name.filter(|m| !m.trim().is_empty()) {
            tx = tx.with_merchant(merchant);
        }
        Some(tx)
    }
}

fn convert_page(raw: Vec<serde_json::Value>) -> Vec<Transaction> {
    raw.into_iter()
        .filter_map(|value| {
            let parsed = serde_json::from_value::<PlaidTransaction>(value)
                .ok()
                .and_then(PlaidTransaction::into_transaction);
            if parsed.is_none() {
                tracing::debug!("Dropping malformed Plaid transaction record");
            }
            parsed
        })
        .collect()
}

#[async_trait::async_trait]
impl TransactionSource for PlaidClient {
    async fn list_transactions(
        &self,
        access_token: &SecretString,
        start_date: NaiveDate,
        end_date: NaiveDate,
        offset: usize,
        count: usize,
    ) -> Result<TransactionPage, ProviderError> {
        #[derive(Serialize)]
        struct Options {
            count: usize,
            offset: usize,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            client_id: &'a str,
            secret: &'a str,
            access_token: &'a str,
            start_date: String,
            end_date: String,
            options: Options,
        }

        let response: TransactionsGetResponse = self
            .request(
                "/transactions/get",
                &Request {
                    client_id: self.client_id(),
                    secret: self.secret(),
                    access_token: access_token.expose_secret(),
                    start_date: start_date.format("%Y-%m-%d").to_string(),
                    end_date: end_date.format("%Y-%m-%d").to_string(),
                    options: Options { count, offset },
                },
            )
            .await?;

        let received = response.transactions.len();
        Ok(TransactionPage {
            transactions: convert_page(response.transactions),
            received,
            total: response.total_transactions,
        })
    }
}

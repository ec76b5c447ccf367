use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A transaction as reported by the provider.
///
/// Amounts follow the provider convention: positive values are money leaving
/// the account (spending), negative values are credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    /// Category hierarchy; position 0 is treated as the primary category.
    #[serde(default)]
    pub category: Vec<String>,
    pub account_id: String,
}

impl Transaction {
    pub fn new(id: impl Into<String>, amount: Decimal, date: NaiveDate) -> Self {
        Self {
            id: id.into(),
            amount,
            date,
            merchant_name: None,
            category: Vec::new(),
            account_id: String::new(),
        }
    }

    pub fn with_merchant(mut self, merchant_name: impl Into<String>) -> Self {
        self.merchant_name = Some(merchant_name.into());
        self
    }

    pub fn with_category<I, S>(mut self, category: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.category = category.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }
}

/// The subset of a transaction the aggregator needs, after spending filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedTransaction {
    pub id: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub account_id: String,
}

impl From<&Transaction> for ProcessedTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            amount: tx.amount,
            date: tx.date,
            merchant_name: tx.merchant_name.clone(),
            category: tx.category.first().cloned(),
            account_id: tx.account_id.clone(),
        }
    }
}

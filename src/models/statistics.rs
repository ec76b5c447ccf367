use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Id;

/// Total spending for one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    pub year: i32,
    pub month: u32,
    pub total_spending: Decimal,
    pub transaction_count: usize,
}

/// Aggregated figures computed from a transaction set, before they are tied
/// to a user and a calculation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingSummary {
    pub average_monthly_spending: Decimal,
    pub last_month_spending: Decimal,
    pub two_months_ago_spending: Option<Decimal>,
    pub current_month_spending: Decimal,
}

impl SpendingSummary {
    pub fn zero() -> Self {
        Self {
            average_monthly_spending: Decimal::ZERO,
            last_month_spending: Decimal::ZERO,
            two_months_ago_spending: None,
            current_month_spending: Decimal::ZERO,
        }
    }

    pub fn into_statistics(self, user_id: Id, calculated_at: DateTime<Utc>) -> SpendingStatistics {
        SpendingStatistics {
            user_id,
            average_monthly_spending: self.average_monthly_spending,
            last_month_spending: self.last_month_spending,
            two_months_ago_spending: self.two_months_ago_spending,
            current_month_spending: self.current_month_spending,
            last_calculated_at: calculated_at,
        }
    }
}

/// Persisted statistics snapshot; one per user, overwritten on every
/// successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingStatistics {
    pub user_id: Id,
    pub average_monthly_spending: Decimal,
    pub last_month_spending: Decimal,
    pub two_months_ago_spending: Option<Decimal>,
    pub current_month_spending: Decimal,
    pub last_calculated_at: DateTime<Utc>,
}

//! Spending aggregation: filtering raw transactions into spending records and
//! reducing them to per-user monthly statistics.
//!
//! Everything here is pure. Malformed or out-of-range input degrades to
//! zero-valued figures instead of failing.

use std::collections::BTreeMap;

use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::AggregationConfig;
use crate::models::{MonthlyAggregate, ProcessedTransaction, SpendingSummary, Transaction};

/// Decides which transactions count as spending.
#[derive(Debug, Clone)]
pub struct SpendingFilter {
    noise_threshold: Decimal,
    excluded_categories: Vec<String>,
}

impl Default for SpendingFilter {
    fn default() -> Self {
        Self::from_config(&AggregationConfig::default())
    }
}

impl SpendingFilter {
    pub fn new<I, S>(noise_threshold: Decimal, excluded_categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            noise_threshold,
            excluded_categories: excluded_categories
                .into_iter()
                .map(|c| normalize_category(c.as_ref()))
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &AggregationConfig) -> Self {
        Self::new(config.noise_threshold, &config.excluded_categories)
    }

    pub fn noise_threshold(&self) -> Decimal {
        self.noise_threshold
    }

    /// Credits, noise-sized amounts and excluded categories are rejected.
    pub fn admits<'a, I>(&self, amount: Decimal, categories: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        if amount <= Decimal::ZERO || amount <= self.noise_threshold {
            return false;
        }
        !categories.into_iter().any(|c| self.is_excluded(c))
    }

    fn is_excluded(&self, category: &str) -> bool {
        let category = normalize_category(category);
        let aliased = PERSONAL_FINANCE_ALIASES
            .iter()
            .find(|(code, _)| category == *code)
            .map(|(_, term)| *term);
        self.excluded_categories.iter().any(|term| {
            contains_words(&category, term) || aliased.is_some_and(|alias| alias == term)
        })
    }

    /// Keep spending transactions and project them down to the fields the
    /// aggregator needs.
    pub fn process(&self, transactions: &[Transaction]) -> Vec<ProcessedTransaction> {
        transactions
            .iter()
            .filter(|tx| self.admits(tx.amount, tx.category.iter().map(String::as_str)))
            .map(ProcessedTransaction::from)
            .collect()
    }

    /// Apply the same rules to already processed records. Idempotent.
    pub fn refilter(&self, transactions: &[ProcessedTransaction]) -> Vec<ProcessedTransaction> {
        transactions
            .iter()
            .filter(|tx| self.admits(tx.amount, tx.category.as_deref()))
            .cloned()
            .collect()
    }
}

/// Personal-finance category codes (normalized) whose wording does not
/// contain the legacy term they correspond to.
const PERSONAL_FINANCE_ALIASES: [(&str, &str); 1] = [("income wages", "payroll")];

/// True when the words of `term` appear consecutively in `category`.
fn contains_words(category: &str, term: &str) -> bool {
    let haystack: Vec<&str> = category.split(' ').collect();
    let needle: Vec<&str> = term.split(' ').collect();
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle.as_slice())
}

/// Lowercase and treat `_`/`-` as word separators so "TRANSFER_IN",
/// "Transfer" and "credit-card" line up with configured terms.
fn normalize_category(category: &str) -> String {
    category
        .trim()
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reduces processed transactions to a [`SpendingSummary`].
#[derive(Debug, Clone)]
pub struct SpendingAggregator {
    filter: SpendingFilter,
    lookback_months: u32,
}

impl Default for SpendingAggregator {
    fn default() -> Self {
        Self::from_config(&AggregationConfig::default())
    }
}

impl SpendingAggregator {
    pub fn new(filter: SpendingFilter, lookback_months: u32) -> Self {
        Self {
            filter,
            lookback_months,
        }
    }

    pub fn from_config(config: &AggregationConfig) -> Self {
        Self::new(SpendingFilter::from_config(config), config.lookback_months)
    }

    pub fn filter(&self) -> &SpendingFilter {
        &self.filter
    }

    /// First day of the window a fetch must cover to compute a summary for
    /// `today`: the start of the earliest historical month.
    pub fn window_start(&self, today: NaiveDate) -> NaiveDate {
        start_of_month(today)
            .checked_sub_months(Months::new(self.lookback_months))
            .unwrap_or(NaiveDate::MIN)
    }

    /// Complete historical months with at least one qualifying transaction,
    /// most recent first.
    pub fn monthly_aggregates(
        &self,
        transactions: &[ProcessedTransaction],
        today: NaiveDate,
    ) -> Vec<MonthlyAggregate> {
        let window_start = self.window_start(today);
        let current_month_start = start_of_month(today);

        let mut by_month: BTreeMap<(i32, u32), MonthlyAggregate> = BTreeMap::new();
        for tx in transactions
            .iter()
            .filter(|tx| tx.date >= window_start && tx.date < current_month_start)
        {
            let key = (tx.date.year(), tx.date.month());
            let entry = by_month.entry(key).or_insert(MonthlyAggregate {
                year: key.0,
                month: key.1,
                total_spending: Decimal::ZERO,
                transaction_count: 0,
            });
            entry.total_spending += tx.amount;
            entry.transaction_count += 1;
        }

        by_month.into_values().rev().collect()
    }

    pub fn summarize(
        &self,
        transactions: &[ProcessedTransaction],
        today: NaiveDate,
    ) -> SpendingSummary {
        let valid: Vec<ProcessedTransaction> = self
            .filter
            .refilter(transactions)
            .into_iter()
            .filter(|tx| tx.date <= today)
            .collect();
        if valid.is_empty() {
            tracing::debug!(
                input = transactions.len(),
                "No qualifying transactions; reporting zeros"
            );
            return SpendingSummary::zero();
        }

        let current_month_start = start_of_month(today);
        let last_month_start = current_month_start
            .checked_sub_months(Months::new(1))
            .unwrap_or(NaiveDate::MIN);

        let current_month = sum_between(&valid, current_month_start, today);
        let last_month = valid
            .iter()
            .filter(|tx| tx.date >= last_month_start && tx.date < current_month_start)
            .map(|tx| tx.amount)
            .sum::<Decimal>();

        let history = self.monthly_aggregates(&valid, today);
        let totals: Vec<Decimal> = history.iter().map(|m| m.total_spending).collect();
        tracing::debug!(
            transactions = valid.len(),
            historical_months = history.len(),
            current_month = %current_month,
            last_month = %last_month,
            "Aggregated spending"
        );

        SpendingSummary {
            average_monthly_spending: round_money(median(&totals)),
            last_month_spending: round_money(last_month),
            two_months_ago_spending: two_months_ago(&history).map(round_money),
            current_month_spending: round_money(current_month),
        }
    }
}

fn start_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn sum_between(transactions: &[ProcessedTransaction], start: NaiveDate, end: NaiveDate) -> Decimal {
    transactions
        .iter()
        .filter(|tx| tx.date >= start && tx.date <= end)
        .map(|tx| tx.amount)
        .sum()
}

/// Positional pick over the historical months (most recent first): the older
/// of two months, or the third most recent when there are three or more.
/// Gaps in the calendar are not accounted for.
pub fn two_months_ago(history: &[MonthlyAggregate]) -> Option<Decimal> {
    match history.len() {
        0 | 1 => None,
        2 => Some(history[1].total_spending),
        _ => Some(history[2].total_spending),
    }
}

/// Median of the given values; zero for an empty slice.
pub fn median(values: &[Decimal]) -> Decimal {
    let mut sorted = values.to_vec();
    sorted.sort();
    let n = sorted.len();
    match n {
        0 => Decimal::ZERO,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / Decimal::TWO,
    }
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::SpendingStatistics;
use crate::reconcile::{ReconciliationHealth, ScanReport};
use crate::retry::RunOutcome;

#[derive(Debug, Serialize)]
pub struct RefreshOutput {
    pub user_id: String,
    pub success: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<SpendingStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshOutput {
    pub fn new(user_id: impl Into<String>, outcome: RunOutcome) -> Self {
        let user_id = user_id.into();
        match outcome {
            RunOutcome::Succeeded {
                attempts,
                statistics,
            } => Self {
                user_id,
                success: true,
                attempts,
                statistics: Some(statistics),
                error_class: None,
                error: None,
            },
            RunOutcome::Failed {
                attempts,
                class,
                error,
            } => Self {
                user_id,
                success: false,
                attempts,
                statistics: None,
                error_class: Some(class.as_str()),
                error: Some(error),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScanOutput {
    #[serde(flatten)]
    pub report: ScanReport,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthOutput {
    #[serde(flatten)]
    pub health: ReconciliationHealth,
    pub checked_at: DateTime<Utc>,
    /// True when some connection has waited past the grace period.
    pub stuck: bool,
}

impl HealthOutput {
    pub fn new(health: ReconciliationHealth, checked_at: DateTime<Utc>) -> Self {
        Self {
            stuck: health.overdue > 0,
            health,
            checked_at,
        }
    }
}

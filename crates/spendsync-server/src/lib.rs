//! HTTP shell over the spendsync pipeline: the provider webhook route, a
//! health endpoint and the periodic reconciliation loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rand::Rng;
use serde_json::json;
use spendsync::app::{App, HealthOutput};
use tower_http::trace::TraceLayer;

/// Header carrying the provider's signed verification token.
pub const VERIFICATION_HEADER: &str = "plaid-verification";

pub fn build_router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/plaid", post(plaid_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

async fn plaid_webhook(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let token = headers
        .get(VERIFICATION_HEADER)
        .and_then(|value| value.to_str().ok());
    let outcome = app.ingress().handle(&body, token).await;
    let status =
        StatusCode::from_u16(outcome.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome))
}

async fn health(State(app): State<Arc<App>>) -> impl IntoResponse {
    match app.scanner().health().await {
        Ok(health) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "spendsync-server",
                "version": env!("CARGO_PKG_VERSION"),
                "reconciliation": HealthOutput::new(health, chrono::Utc::now()),
            })),
        ),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error", "error": err.to_string() })),
            )
        }
    }
}

/// Interval with random jitter in `[-jitter, +jitter]`, never below one second.
pub fn compute_next_delay(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }

    let base_ms = interval.as_millis().min(u128::from(u64::MAX)) as i128;
    let jitter_ms = jitter.as_millis().min(u128::from(u64::MAX)) as i128;
    let offset = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);

    let min_ms = 1_000_i128;
    let max_ms = i128::from(u64::MAX);
    let delay_ms = (base_ms + offset).clamp(min_ms, max_ms) as u64;
    Duration::from_millis(delay_ms)
}

/// Run reconciliation scans until `shutdown` resolves.
pub async fn run_reconciliation_loop<F>(
    app: Arc<App>,
    interval: Duration,
    jitter: Duration,
    scan_on_start: bool,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    if scan_on_start {
        run_scan(&app, "startup").await;
    }

    loop {
        let next_delay = compute_next_delay(interval, jitter);
        tracing::debug!(
            next_in_ms = next_delay.as_millis() as u64,
            "Next reconciliation scan scheduled"
        );
        let sleep = tokio::time::sleep(next_delay);
        tokio::pin!(sleep);

        tokio::select! {
            _ = &mut sleep => run_scan(&app, "scheduled").await,
            _ = &mut shutdown => {
                tracing::info!("Reconciliation loop stopping");
                break;
            }
        }
    }
}

async fn run_scan(app: &App, reason: &str) {
    match app.scanner().scan().await {
        Ok(report) => tracing::info!(
            reason,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            "Reconciliation cycle complete"
        ),
        Err(err) => tracing::error!(
            reason,
            error = %format!("{err:#}"),
            "Reconciliation cycle failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_next_delay_without_jitter_is_constant() {
        let interval = Duration::from_secs(300);
        assert_eq!(compute_next_delay(interval, Duration::ZERO), interval);
    }

    #[test]
    fn compute_next_delay_with_jitter_stays_in_range() {
        let interval = Duration::from_secs(600);
        let jitter = Duration::from_secs(120);

        for _ in 0..100 {
            let delay = compute_next_delay(interval, jitter);
            assert!(delay >= Duration::from_secs(480));
            assert!(delay <= Duration::from_secs(720));
        }
    }

    #[test]
    fn compute_next_delay_never_drops_below_one_second() {
        let delay = compute_next_delay(Duration::from_millis(10), Duration::from_secs(5));
        assert!(delay >= Duration::from_secs(1));
    }
}

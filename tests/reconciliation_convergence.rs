mod support;

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use spendsync::clock::{Clock, ManualClock};
use spendsync::error::ErrorClass;
use spendsync::models::{Connection, Id};
use spendsync::retry::RunOutcome;
use spendsync::storage::{JsonFileStorage, Storage};
use support::{build_app, mount_transactions, now, scenario_transactions};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_login_required(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/transactions/get"))
        .and(body_partial_json(json!({"access_token": access_token})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_type": "ITEM_ERROR",
            "error_code": "ITEM_LOGIN_REQUIRED",
            "error_message": "the login details of this item have changed",
            "request_id": "req-err"
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn scan_converges_on_connections_past_the_grace_period() -> Result<()> {
    let dir = TempDir::new()?;
    let server = MockServer::start().await;
    mount_transactions(&server, "access-old", scenario_transactions()).await;
    mount_transactions(&server, "access-fresh", scenario_transactions()).await;

    let clock = Arc::new(ManualClock::new(now()));
    let storage = Arc::new(JsonFileStorage::new(dir.path()));
    storage
        .save_connection(
            &Connection::new("item-old", "user-old", clock.as_ref())
                .with_access_token("access-old")
                .with_connected_at(now() - chrono::Duration::minutes(10)),
        )
        .await?;
    storage
        .save_connection(
            &Connection::new("item-fresh", "user-fresh", clock.as_ref())
                .with_access_token("access-fresh")
                .with_connected_at(now() - chrono::Duration::minutes(2)),
        )
        .await?;

    let app = build_app(&server, storage.clone(), clock.clone());

    let health = app.scanner().health().await?;
    assert_eq!(health.pending, 2);
    assert_eq!(health.overdue, 1);

    let report = app.scanner().scan().await?;
    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);
    assert!(storage.get_statistics(&Id::from("user-old")).await?.is_some());
    assert!(storage.get_statistics(&Id::from("user-fresh")).await?.is_none());

    clock.advance(chrono::Duration::minutes(5));
    let report = app.scanner().scan().await?;
    assert_eq!(report.processed, 1);
    assert!(storage.get_statistics(&Id::from("user-fresh")).await?.is_some());

    let report = app.scanner().scan().await?;
    assert_eq!(report.processed, 0);
    let health = app.scanner().health().await?;
    assert_eq!(health.pending, 0);
    assert_eq!(health.oldest_pending_connected_at, None);

    // A fresh process over the same directory sees the persisted state.
    let reopened = JsonFileStorage::new(dir.path());
    let stats = reopened
        .get_statistics(&Id::from("user-fresh"))
        .await?
        .expect("statistics persisted to disk");
    assert_eq!(stats.last_calculated_at, clock.now());
    Ok(())
}

#[tokio::test]
async fn broken_credential_fails_once_and_stays_pending() -> Result<()> {
    let dir = TempDir::new()?;
    let server = MockServer::start().await;
    mount_transactions(&server, "access-good", scenario_transactions()).await;
    mount_login_required(&server, "access-revoked").await;

    let clock = Arc::new(ManualClock::new(now()));
    let storage = Arc::new(JsonFileStorage::new(dir.path()));
    for (item, user, token) in [
        ("item-revoked", "user-revoked", "access-revoked"),
        ("item-good", "user-good", "access-good"),
    ] {
        storage
            .save_connection(
                &Connection::new(item, user, clock.as_ref())
                    .with_access_token(token)
                    .with_connected_at(now() - chrono::Duration::hours(1)),
            )
            .await?;
    }

    let app = build_app(&server, storage.clone(), clock.clone());
    let report = app.scanner().scan().await?;
    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);

    let outcome = app.refresh(&Id::from("user-revoked")).await;
    match outcome {
        RunOutcome::Failed { attempts, class, .. } => {
            assert_eq!(attempts, 1);
            assert_eq!(class, ErrorClass::Permanent);
        }
        other => panic!("expected permanent failure, got {other:?}"),
    }

    let health = app.scanner().health().await?;
    assert_eq!(health.pending, 1);
    assert_eq!(health.overdue, 1);
    Ok(())
}

#[tokio::test]
async fn transient_upstream_failure_is_retried_until_it_succeeds() -> Result<()> {
    let dir = TempDir::new()?;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/transactions/get"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_transactions(&server, "access-flaky", scenario_transactions()).await;

    let clock = Arc::new(ManualClock::new(now()));
    let storage = Arc::new(JsonFileStorage::new(dir.path()));
    storage
        .save_connection(
            &Connection::new("item-flaky", "user-flaky", clock.as_ref())
                .with_access_token("access-flaky"),
        )
        .await?;

    let app = build_app(&server, storage.clone(), clock);
    let outcome = app.refresh(&Id::from("user-flaky")).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.attempts(), 2);
    assert!(storage.get_statistics(&Id::from("user-flaky")).await?.is_some());
    Ok(())
}

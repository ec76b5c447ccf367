use std::sync::Arc;

use serde::Serialize;

use super::event::{TransactionsCode, WebhookEvent, WebhookKind};
use super::verifier::WebhookVerifier;
use crate::retry::RefreshScheduler;
use crate::storage::Storage;

/// Result of handling one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingOutcome {
    pub success: bool,
    pub message: String,
    pub retryable: bool,
}

impl ProcessingOutcome {
    /// Handled, or deliberately ignored. Either way the provider should not
    /// redeliver.
    pub fn acknowledged(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            retryable: false,
        }
    }

    /// Failed in a way a redelivery may fix.
    pub fn retry_later(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            retryable: true,
        }
    }

    /// Refused outright; redelivering the same request cannot succeed.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn http_status(&self) -> u16 {
        match (self.success, self.retryable) {
            (true, _) => 200,
            (false, true) => 503,
            (false, false) => 400,
        }
    }
}

/// Maps verified events to statistics runs.
pub struct WebhookRouter {
    storage: Arc<dyn Storage>,
    scheduler: Arc<dyn RefreshScheduler>,
}

impl WebhookRouter {
    pub fn new(storage: Arc<dyn Storage>, scheduler: Arc<dyn RefreshScheduler>) -> Self {
        Self { storage, scheduler }
    }

    pub async fn route(&self, event: &WebhookEvent) -> ProcessingOutcome {
        let webhook_type = event.webhook_type();
        let webhook_code = event.webhook_code();

        if let Some(error) = &event.error {
            tracing::warn!(
                webhook_type,
                webhook_code,
                connection_id = %event.connection_id,
                error_code = error.error_code.as_deref().unwrap_or("unknown"),
                error_message = error.error_message.as_deref().unwrap_or(""),
                "Provider reported an error in webhook"
            );
            return ProcessingOutcome::acknowledged("provider error acknowledged");
        }

        let code = match &event.kind {
            WebhookKind::Transactions(code) => code,
            WebhookKind::Unsupported { .. } => {
                tracing::debug!(webhook_type, webhook_code, "Ignoring unsupported webhook type");
                return ProcessingOutcome::acknowledged("acknowledged, ignored");
            }
        };

        let connection = match self.storage.get_connection(&event.connection_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                tracing::info!(
                    connection_id = %event.connection_id,
                    webhook_code,
                    "Webhook for unknown connection"
                );
                return ProcessingOutcome::acknowledged("unknown connection");
            }
            Err(err) => {
                tracing::warn!(
                    connection_id = %event.connection_id,
                    error = %format!("{err:#}"),
                    "Failed to look up webhook connection"
                );
                return ProcessingOutcome::retry_later("connection lookup failed");
            }
        };

        match code {
            TransactionsCode::HistoricalUpdate | TransactionsCode::DefaultUpdate => {
                let started = self.scheduler.schedule(connection.user_id.clone());
                tracing::info!(
                    user_id = %connection.user_id,
                    connection_id = %connection.id,
                    webhook_code,
                    new_transactions = event.new_transactions,
                    started,
                    "Scheduled statistics refresh"
                );
                if started {
                    ProcessingOutcome::acknowledged("statistics refresh scheduled")
                } else {
                    ProcessingOutcome::acknowledged("statistics refresh queued behind current run")
                }
            }
            TransactionsCode::Other(_) => {
                tracing::debug!(webhook_code, "Ignoring unsupported transactions code");
                ProcessingOutcome::acknowledged("acknowledged, ignored")
            }
        }
    }
}

/// Inbound webhook boundary: verify, parse, route.
pub struct WebhookIngress {
    verifier: WebhookVerifier,
    router: WebhookRouter,
}

impl WebhookIngress {
    pub fn new(verifier: WebhookVerifier, router: WebhookRouter) -> Self {
        Self { verifier, router }
    }

    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature_token: Option<&str>,
    ) -> ProcessingOutcome {
        let Some(token) = signature_token.filter(|t| !t.trim().is_empty()) else {
            tracing::warn!("Webhook delivery without signature token");
            return ProcessingOutcome::rejected("verification failed");
        };

        let verified = match self.verifier.verify(raw_body, token).await {
            Ok(verified) => verified,
            Err(_) => return ProcessingOutcome::rejected("verification failed"),
        };

        let event = match WebhookEvent::parse(raw_body) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(
                    key_id = %verified.key_id,
                    error = %err,
                    "Malformed webhook payload"
                );
                return ProcessingOutcome::rejected("malformed payload");
            }
        };

        self.router.route(&event).await
    }
}

use serde::Deserialize;

use crate::models::Id;

/// The provider's category for transaction-history notifications.
pub const TRANSACTIONS_TYPE: &str = "TRANSACTIONS";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum WebhookParseError {
    #[error("webhook body is not a JSON object: {0}")]
    InvalidJson(String),
    #[error("webhook is missing required field {0}")]
    MissingField(&'static str),
    #[error("webhook field {field} is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionsCode {
    /// The provider finished loading the full transaction history.
    HistoricalUpdate,
    /// New transactions are available since the last notification.
    DefaultUpdate,
    Other(String),
}

impl TransactionsCode {
    fn parse(code: &str) -> Self {
        match code {
            "HISTORICAL_UPDATE" => Self::HistoricalUpdate,
            "DEFAULT_UPDATE" => Self::DefaultUpdate,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::HistoricalUpdate => "HISTORICAL_UPDATE",
            Self::DefaultUpdate => "DEFAULT_UPDATE",
            Self::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookKind {
    Transactions(TransactionsCode),
    Unsupported { webhook_type: String, webhook_code: String },
}

/// An error the provider attached to the notification itself.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReportedError {
    #[serde(default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// A validated webhook payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub kind: WebhookKind,
    pub connection_id: Id,
    pub error: Option<ReportedError>,
    pub new_transactions: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    webhook_type: Option<String>,
    webhook_code: Option<String>,
    item_id: Option<String>,
    #[serde(default)]
    error: Option<ReportedError>,
    #[serde(default)]
    new_transactions: Option<u64>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, WebhookParseError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(WebhookParseError::MissingField(field)),
    }
}

impl WebhookEvent {
    /// Parse a raw webhook body. Any shape problem is a hard failure.
    pub fn parse(raw_body: &[u8]) -> Result<Self, WebhookParseError> {
        let raw: RawEvent = serde_json::from_slice(raw_body)
            .map_err(|e| WebhookParseError::InvalidJson(e.to_string()))?;

        let webhook_type = required(raw.webhook_type, "webhook_type")?;
        let webhook_code = required(raw.webhook_code, "webhook_code")?;
        let item_id = required(raw.item_id, "item_id")?;
        let connection_id =
            Id::from_string_checked(item_id).map_err(|e| WebhookParseError::InvalidField {
                field: "item_id",
                reason: e.to_string(),
            })?;

        let kind = if webhook_type == TRANSACTIONS_TYPE {
            WebhookKind::Transactions(TransactionsCode::parse(&webhook_code))
        } else {
            WebhookKind::Unsupported {
                webhook_type,
                webhook_code,
            }
        };

        Ok(Self {
            kind,
            connection_id,
            error: raw.error,
            new_transactions: raw.new_transactions,
        })
    }

    pub fn webhook_type(&self) -> &str {
        match &self.kind {
            WebhookKind::Transactions(_) => TRANSACTIONS_TYPE,
            WebhookKind::Unsupported { webhook_type, .. } => webhook_type,
        }
    }

    pub fn webhook_code(&self) -> &str {
        match &self.kind {
            WebhookKind::Transactions(code) => code.as_str(),
            WebhookKind::Unsupported { webhook_code, .. } => webhook_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_transactions_event() {
        let event = WebhookEvent::parse(
            br#"{"webhook_type":"TRANSACTIONS","webhook_code":"HISTORICAL_UPDATE","item_id":"item-1","new_transactions":231,"error":null}"#,
        )
        .unwrap();
        assert_eq!(
            event.kind,
            WebhookKind::Transactions(TransactionsCode::HistoricalUpdate)
        );
        assert_eq!(event.connection_id.as_str(), "item-1");
        assert_eq!(event.new_transactions, Some(231));
        assert!(event.error.is_none());
    }

    #[test]
    fn keeps_unknown_types_and_codes() {
        let event = WebhookEvent::parse(
            br#"{"webhook_type":"ITEM","webhook_code":"PENDING_EXPIRATION","item_id":"item-1"}"#,
        )
        .unwrap();
        assert_eq!(event.webhook_type(), "ITEM");
        assert_eq!(event.webhook_code(), "PENDING_EXPIRATION");

        let event = WebhookEvent::parse(
            br#"{"webhook_type":"TRANSACTIONS","webhook_code":"TRANSACTIONS_REMOVED","item_id":"item-1"}"#,
        )
        .unwrap();
        assert_eq!(
            event.kind,
            WebhookKind::Transactions(TransactionsCode::Other("TRANSACTIONS_REMOVED".to_string()))
        );
    }

    #[test]
    fn captures_provider_reported_error() {
        let event = WebhookEvent::parse(
            br#"{"webhook_type":"TRANSACTIONS","webhook_code":"DEFAULT_UPDATE","item_id":"item-1","error":{"error_type":"ITEM_ERROR","error_code":"ITEM_LOGIN_REQUIRED","error_message":"login required"}}"#,
        )
        .unwrap();
        let error = event.error.unwrap();
        assert_eq!(error.error_code.as_deref(), Some("ITEM_LOGIN_REQUIRED"));
    }

    #[test]
    fn fails_closed_on_bad_shapes() {
        assert!(matches!(
            WebhookEvent::parse(b"[1,2,3]"),
            Err(WebhookParseError::InvalidJson(_))
        ));
        assert_eq!(
            WebhookEvent::parse(br#"{"webhook_code":"DEFAULT_UPDATE","item_id":"x"}"#),
            Err(WebhookParseError::MissingField("webhook_type"))
        );
        assert_eq!(
            WebhookEvent::parse(
                br#"{"webhook_type":"TRANSACTIONS","webhook_code":"","item_id":"x"}"#
            ),
            Err(WebhookParseError::MissingField("webhook_code"))
        );
        assert_eq!(
            WebhookEvent::parse(
                br#"{"webhook_type":"TRANSACTIONS","webhook_code":"DEFAULT_UPDATE"}"#
            ),
            Err(WebhookParseError::MissingField("item_id"))
        );
        assert!(matches!(
            WebhookEvent::parse(
                br#"{"webhook_type":"TRANSACTIONS","webhook_code":"DEFAULT_UPDATE","item_id":"../etc"}"#
            ),
            Err(WebhookParseError::InvalidField { field: "item_id", .. })
        ));
        assert!(matches!(
            WebhookEvent::parse(
                br#"{"webhook_type":7,"webhook_code":"DEFAULT_UPDATE","item_id":"x"}"#
            ),
            Err(WebhookParseError::InvalidJson(_))
        ));
    }
}

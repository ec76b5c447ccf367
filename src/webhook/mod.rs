//! Inbound webhook handling: signature verification, payload parsing and
//! dispatch to the retry controller.

mod event;
mod keys;
mod router;
mod verifier;

pub use event::{
    ReportedError, TransactionsCode, WebhookEvent, WebhookKind, WebhookParseError,
    TRANSACTIONS_TYPE,
};
pub use keys::{KeyCache, KeySource, VerificationKey};
pub use router::{ProcessingOutcome, WebhookIngress, WebhookRouter};
pub use verifier::{
    VerificationError, VerificationFailure, VerifiedToken, WebhookVerifier, EXPECTED_ALGORITHM,
};

//! Error taxonomy shared by the fetch, credential and retry layers.
//!
//! Every failure that reaches the retry controller is either permanent
//! (retrying cannot help without outside intervention) or transient.

use std::time::Duration;

use crate::models::Id;

/// Whether retrying a failed run can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("user not found: {0}")]
    UserNotFound(Id),
    #[error("no access credential for user {0}")]
    NoAccessCredential(Id),
    #[error("invalid access credential for user {0}")]
    InvalidAccessCredential(Id),
}

/// Failure fetching transactions from the provider.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    /// The access credential is missing, revoked or otherwise unusable.
    #[error("invalid access credential: {0}")]
    Permanent(String),
    #[error("transaction fetch failed: {0}")]
    Transient(String),
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Permanent(_) => ErrorClass::Permanent,
            Self::Transient(_) => ErrorClass::Transient,
        }
    }
}

/// A failed statistics run (one attempt).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("statistics store failed: {0:#}")]
    Storage(anyhow::Error),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Credential(_) => ErrorClass::Permanent,
            Self::Fetch(err) => err.class(),
            Self::Storage(_) | Self::Timeout { .. } => ErrorClass::Transient,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.class() == ErrorClass::Permanent
    }
}

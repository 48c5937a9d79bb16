use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use bankbook_infra::command_dispatcher::DispatchError;
use bankbook_infra::config::ConfigError;
use bankbook_infra::event_store::EventStoreError;
use bankbook_infra::projections::ProjectionError;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Immutability,
    Integrity,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug, Error)]
pub enum BankError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Immutability(String),
    #[error("{0}")]
    Integrity(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BankError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BankError::Validation(_) => ErrorKind::Validation,
            BankError::Immutability(_) => ErrorKind::Immutability,
            BankError::Integrity(_) => ErrorKind::Integrity,
            BankError::NotFound(_) => ErrorKind::NotFound,
            BankError::Conflict(_) => ErrorKind::Conflict,
            BankError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(what: &str, id: impl core::fmt::Display) -> Self {
        BankError::NotFound(format!("{what} {id}"))
    }

    /// `{ "error": <kind>, "message": <text> }`
    pub fn to_json(&self) -> JsonValue {
        json!({
            "error": self.kind(),
            "message": self.to_string(),
        })
    }
}

impl From<DispatchError> for BankError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation(msg) | DispatchError::InvalidId(msg) => BankError::Validation(msg),
            DispatchError::Immutability(msg) => BankError::Immutability(msg),
            DispatchError::Integrity(msg) => BankError::Integrity(msg),
            DispatchError::NotFound => BankError::NotFound("record".to_string()),
            DispatchError::Conflict(msg) | DispatchError::Concurrency(msg) => BankError::Conflict(msg),
            other @ (DispatchError::Deserialize(_)
            | DispatchError::Store(_)
            | DispatchError::Publish(_)
            | DispatchError::Poisoned) => BankError::Internal(other.to_string()),
        }
    }
}

impl From<EventStoreError> for BankError {
    fn from(err: EventStoreError) -> Self {
        BankError::Internal(err.to_string())
    }
}

impl From<ProjectionError> for BankError {
    fn from(err: ProjectionError) -> Self {
        BankError::Internal(err.to_string())
    }
}

impl From<ConfigError> for BankError {
    fn from(err: ConfigError) -> Self {
        BankError::Internal(err.to_string())
    }
}

/// Replace the context-free "record not found" of the dispatcher with what was looked up.
pub(crate) fn in_context(
    what: &'static str,
    id: impl core::fmt::Display,
) -> impl FnOnce(DispatchError) -> BankError {
    move |err| match err {
        DispatchError::NotFound => BankError::not_found(what, id),
        other => other.into(),
    }
}

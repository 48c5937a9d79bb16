//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Only deterministic bookkeeping failures live here. Storage and transport
/// failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A data invariant was violated (non-positive amount, insufficient funds,
    /// malformed contact field, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A field that is frozen after creation was part of a change set.
    #[error("immutable field: {0}")]
    Immutability(String),

    /// A delete would break a reference or the append/delete-last ledger rule.
    #[error("integrity violated: {0}")]
    Integrity(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The addressed record does not exist (or was deleted).
    #[error("not found")]
    NotFound,

    /// The command collides with current state (duplicate create, stale version).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn immutability(msg: impl Into<String>) -> Self {
        Self::Immutability(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}

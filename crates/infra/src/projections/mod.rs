//! Projection implementations (read model builders).
//!
//! Projections consume committed envelopes and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event store
//! - **Idempotent**: envelopes at or below the stream cursor are ignored, so
//!   at-least-once delivery is safe
//! - **Ordered**: a gap in a stream's sequence numbers is an error, not a skip

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use bankbook_events::EventEnvelope;

pub mod accounts;
pub mod cursor;
pub mod customers;
pub mod movements;
pub mod ownership;

pub use accounts::{AccountReadModel, AccountsProjection};
pub use cursor::{CursorCheck, StreamCursors};
pub use customers::{CustomerDirectoryProjection, CustomerReadModel};
pub use movements::{MovementReadModel, MovementsProjection};
pub use ownership::{CustomerAccounts, OwnershipIndexProjection};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("failed to deserialize event payload: {0}")]
    Deserialize(String),

    #[error("event does not belong to its envelope stream: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

/// A read model fed by committed envelopes.
pub trait Projection: Send + Sync {
    /// Stable projection name (used in logs).
    fn name(&self) -> &'static str;

    /// Apply one envelope. Envelopes of other aggregate types are ignored.
    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drop every record and cursor.
    fn reset(&self) -> Result<(), ProjectionError>;

    /// Rebuild the read model from scratch by replaying envelopes.
    fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError>
    where
        Self: Sized,
    {
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        self.reset()?;

        // Deterministic replay order: aggregate, sequence.
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        tracing::debug!(projection = self.name(), replayed = envs.len(), "projection rebuilt");
        Ok(())
    }
}

pub(crate) fn decode<E: DeserializeOwned>(
    envelope: &EventEnvelope<JsonValue>,
) -> Result<E, ProjectionError> {
    serde_json::from_value(envelope.payload().clone())
        .map_err(|e| ProjectionError::Deserialize(e.to_string()))
}

use serde::Serialize;
use serde_json::Value as JsonValue;

use bankbook_core::{AggregateId, CustomerId};
use bankbook_customers::CustomerEvent;
use bankbook_events::EventEnvelope;

use super::{CursorCheck, Projection, ProjectionError, StreamCursors, decode};
use crate::read_model::ReadModelStore;

/// Queryable customer read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerReadModel {
    pub customer_id: CustomerId,
    pub name: String,
    pub login: String,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
}

/// Customer directory projection.
#[derive(Debug)]
pub struct CustomerDirectoryProjection<S>
where
    S: ReadModelStore<CustomerId, CustomerReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> CustomerDirectoryProjection<S>
where
    S: ReadModelStore<CustomerId, CustomerReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, customer_id: &CustomerId) -> Option<CustomerReadModel> {
        self.store.get(customer_id)
    }

    /// All active customers, ordered by name then id.
    pub fn list(&self) -> Vec<CustomerReadModel> {
        let mut all = self.store.list();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.customer_id.cmp(&b.customer_id)));
        all
    }
}

impl<S> Projection for CustomerDirectoryProjection<S>
where
    S: ReadModelStore<CustomerId, CustomerReadModel>,
{
    fn name(&self) -> &'static str {
        "customers.directory"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != bankbook_customers::AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if self.cursors.check(aggregate_id, seq)? == CursorCheck::Duplicate {
            return Ok(());
        }

        let event: CustomerEvent = decode(envelope)?;
        if AggregateId::from(event.customer_id()) != aggregate_id {
            return Err(ProjectionError::StreamMismatch(
                "event customer_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            CustomerEvent::CustomerRegistered(e) => {
                self.store.upsert(
                    e.customer_id,
                    CustomerReadModel {
                        customer_id: e.customer_id,
                        name: e.name,
                        login: e.login,
                        city: e.contact.city,
                        zip: e.contact.zip,
                        phone: e.contact.phone,
                    },
                );
            }
            CustomerEvent::CustomerUpdated(e) => {
                self.store.upsert(
                    e.customer_id,
                    CustomerReadModel {
                        customer_id: e.customer_id,
                        name: e.name,
                        login: e.login,
                        city: e.contact.city,
                        zip: e.contact.zip,
                        phone: e.contact.phone,
                    },
                );
            }
            CustomerEvent::CustomerRemoved(e) => {
                self.store.remove(&e.customer_id);
            }
        }

        self.cursors.advance(aggregate_id, seq)?;
        tracing::debug!(projection = self.name(), %aggregate_id, seq, "envelope applied");
        Ok(())
    }

    fn reset(&self) -> Result<(), ProjectionError> {
        self.store.clear();
        self.cursors.clear()
    }
}

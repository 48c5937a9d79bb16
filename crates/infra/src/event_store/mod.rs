//! Append-only event store boundary.
//!
//! Streams are the source of truth for every aggregate; read models are derived
//! from them and can always be rebuilt.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

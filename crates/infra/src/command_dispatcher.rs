//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 0. Acquire the stream lock (one command per stream at a time)
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus
//! ```
//!
//! The stream lock is held from step 1 to step 5, so a decision is never taken
//! on a snapshot that another command is about to invalidate, and subscribers see
//! each stream's events in sequence order. Two payments on the same account are
//! checked one after the other, each against the balance the previous one left
//! behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use bankbook_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use bankbook_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Domain validation failure (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),
    /// Attempt to change a field frozen at creation.
    #[error("immutable field: {0}")]
    Immutability(String),
    /// Referential or ledger-discipline violation.
    #[error("integrity violated: {0}")]
    Integrity(String),
    /// Malformed identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
    /// Domain-level not found.
    #[error("not found")]
    NotFound,
    /// Domain conflict (duplicate create, duplicate movement id).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Optimistic concurrency failure (stale stream version).
    #[error("concurrent modification: {0}")]
    Concurrency(String),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    /// Persisting to the event store failed.
    #[error("event store error: {0}")]
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry may duplicate).
    #[error("event publication failed: {0}")]
    Publish(String),
    /// A stream lock was poisoned by a panicking holder.
    #[error("stream lock poisoned")]
    Poisoned,
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::Immutability(msg) => DispatchError::Immutability(msg),
            DomainError::Integrity(msg) => DispatchError::Integrity(msg),
            DomainError::InvalidId(msg) => DispatchError::InvalidId(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// - **Atomicity**: events are persisted before publication; if the decision or the
///   append fails, nothing is written and nothing is published.
/// - **Isolation**: each command operates on a single stream, serialized per stream.
/// - **Consistency**: the append still carries `ExpectedVersion::Exact`, so a second
///   writer that bypasses the dispatcher is detected rather than silently merged.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    stream_locks: StreamLocks,
}

type StreamLocks = Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>;

/// Shared handle on one stream's lock.
///
/// Clones of the inner `Arc` are only taken under the `stream_locks` mutex, so a
/// strong count of 2 on drop (map entry plus this lease) means nobody else holds
/// or waits for the stream and its entry can go.
struct StreamLease<'a> {
    locks: &'a StreamLocks,
    aggregate_id: AggregateId,
    lock: Arc<Mutex<()>>,
}

impl StreamLease<'_> {
    fn lock(&self) -> Result<MutexGuard<'_, ()>, DispatchError> {
        self.lock.lock().map_err(|_| DispatchError::Poisoned)
    }
}

impl Drop for StreamLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.aggregate_id);
        }
    }
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            stream_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn stream_lease(&self, aggregate_id: AggregateId) -> Result<StreamLease<'_>, DispatchError> {
        let mut locks = self.stream_locks.lock().map_err(|_| DispatchError::Poisoned)?;
        let lock = locks.entry(aggregate_id).or_default().clone();
        Ok(StreamLease {
            locks: &self.stream_locks,
            aggregate_id,
            lock,
        })
    }

    /// Streams with a command in flight or waiting.
    pub fn locked_streams(&self) -> usize {
        self.stream_locks
            .lock()
            .map(|locks| locks.len())
            .unwrap_or_default()
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// `make_aggregate` builds the empty instance history is applied to (e.g.
    /// `Account::empty(id)`).
    ///
    /// Returns the committed events with their assigned sequence numbers; an empty
    /// vector when the command decided nothing (e.g. undo on an empty ledger).
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: bankbook_events::Event + Serialize + DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();

        let lease = self.stream_lease(aggregate_id)?;
        let _guard = lease.lock()?;

        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = match aggregate.handle(&command) {
            Ok(decided) => decided,
            Err(err) => {
                tracing::warn!(
                    aggregate_type = %aggregate_type,
                    aggregate_id = %aggregate_id,
                    error = %err,
                    "command rejected"
                );
                return Err(err.into());
            }
        };
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(aggregate_id, aggregate_type.clone(), Uuid::now_v7(), ev)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for stored in &committed {
            tracing::info!(
                aggregate_type = %stored.aggregate_type,
                aggregate_id = %stored.aggregate_id,
                sequence_number = stored.sequence_number,
                event_type = %stored.event_type,
                "event committed"
            );
        }

        // 5) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }

    /// Rehydrate an aggregate from its stream without dispatching anything.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

use bankbook_accounts::{AccountEvent, AccountId, MovementId, MovementKind};
use bankbook_core::Currency;
use bankbook_events::EventEnvelope;

use super::{CursorCheck, Projection, ProjectionError, StreamCursors, decode};
use crate::read_model::ReadModelStore;

/// Queryable movement read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovementReadModel {
    pub movement_id: MovementId,
    pub account_id: AccountId,
    pub sequence: u64,
    pub kind: MovementKind,
    pub amount: Decimal,
    /// Inherited from the owning account.
    pub currency: Currency,
    pub timestamp: DateTime<Utc>,
    pub balance_snapshot: Decimal,
}

impl MovementReadModel {
    fn recency_key(&self) -> RecencyKey {
        (self.timestamp, self.sequence)
    }
}

/// `(timestamp, ledger sequence)`; larger is more recent.
type RecencyKey = (DateTime<Utc>, u64);

/// Per-account slice of the index: the account currency and its movements by recency.
#[derive(Debug, Default)]
struct AccountLedger {
    currency: Currency,
    by_recency: BTreeMap<RecencyKey, MovementId>,
}

/// Movement index across all accounts.
#[derive(Debug)]
pub struct MovementsProjection<S>
where
    S: ReadModelStore<MovementId, MovementReadModel>,
{
    store: S,
    ledgers: RwLock<HashMap<AccountId, AccountLedger>>,
    cursors: StreamCursors,
}

impl<S> MovementsProjection<S>
where
    S: ReadModelStore<MovementId, MovementReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            ledgers: RwLock::new(HashMap::new()),
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, movement_id: &MovementId) -> Option<MovementReadModel> {
        self.store.get(movement_id)
    }

    /// Movements of one account, most recent first (timestamp, then ledger sequence).
    pub fn by_account(&self, account_id: AccountId) -> Vec<MovementReadModel> {
        let Ok(ledgers) = self.ledgers.read() else {
            return vec![];
        };
        ledgers
            .get(&account_id)
            .map(|ledger| {
                ledger
                    .by_recency
                    .values()
                    .rev()
                    .filter_map(|movement_id| self.store.get(movement_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The only movement of `account_id` that may currently be deleted.
    pub fn latest(&self, account_id: AccountId) -> Option<MovementReadModel> {
        let ledgers = self.ledgers.read().ok()?;
        let (_, movement_id) = ledgers.get(&account_id)?.by_recency.last_key_value()?;
        self.store.get(movement_id)
    }

    fn write_ledgers(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<AccountId, AccountLedger>>, ProjectionError> {
        self.ledgers
            .write()
            .map_err(|_| ProjectionError::Poisoned("movement ledgers"))
    }
}

impl<S> Projection for MovementsProjection<S>
where
    S: ReadModelStore<MovementId, MovementReadModel>,
{
    fn name(&self) -> &'static str {
        "accounts.movements"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != bankbook_accounts::AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if self.cursors.check(aggregate_id, seq)? == CursorCheck::Duplicate {
            return Ok(());
        }

        let event: AccountEvent = decode(envelope)?;
        if event.account_id().0 != aggregate_id {
            return Err(ProjectionError::StreamMismatch(
                "event account_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match event {
            AccountEvent::AccountOpened(e) => {
                self.write_ledgers()?.insert(
                    e.account_id,
                    AccountLedger {
                        currency: e.currency,
                        by_recency: BTreeMap::new(),
                    },
                );
            }
            AccountEvent::MovementRecorded(e) => {
                let mut ledgers = self.write_ledgers()?;
                let ledger = ledgers.entry(e.account_id).or_default();
                let movement = MovementReadModel {
                    movement_id: e.movement_id,
                    account_id: e.account_id,
                    sequence: e.sequence,
                    kind: e.kind,
                    amount: e.amount,
                    currency: ledger.currency.clone(),
                    timestamp: e.occurred_at,
                    balance_snapshot: e.balance_after,
                };
                ledger.by_recency.insert(movement.recency_key(), e.movement_id);
                self.store.upsert(e.movement_id, movement);
            }
            AccountEvent::MovementRemoved(e) => {
                let mut ledgers = self.write_ledgers()?;
                if let Some(removed) = self.store.remove(&e.movement_id) {
                    if let Some(ledger) = ledgers.get_mut(&e.account_id) {
                        ledger.by_recency.remove(&removed.recency_key());
                    }
                }
            }
            AccountEvent::AccountDeleted(e) => {
                self.write_ledgers()?.remove(&e.account_id);
            }
            AccountEvent::AccountUpdated(_) => {}
        }

        self.cursors.advance(aggregate_id, seq)?;
        tracing::debug!(projection = self.name(), %aggregate_id, seq, "envelope applied");
        Ok(())
    }

    fn reset(&self) -> Result<(), ProjectionError> {
        self.store.clear();
        self.write_ledgers()?.clear();
        self.cursors.clear()
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

use bankbook_accounts::{AccountEvent, AccountId, AccountType, credit_available};
use bankbook_core::{Currency, CustomerId};
use bankbook_events::EventEnvelope;

use super::{CursorCheck, Projection, ProjectionError, StreamCursors, decode};
use crate::read_model::ReadModelStore;

/// Queryable account read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountReadModel {
    pub account_id: AccountId,
    pub name: String,
    pub currency: Currency,
    pub account_type: AccountType,
    pub begin_balance: Decimal,
    pub begin_balance_timestamp: DateTime<Utc>,
    pub credit_line: Decimal,
    pub balance: Decimal,
    pub credit_available: Decimal,
    pub customers: Vec<CustomerId>,
    pub movement_count: usize,
}

impl AccountReadModel {
    fn refresh_credit(&mut self) {
        self.credit_available = credit_available(self.account_type, self.credit_line, self.balance);
    }
}

/// Account listing projection.
///
/// Keeps one row per open account; deleted accounts disappear from the listing.
#[derive(Debug)]
pub struct AccountsProjection<S>
where
    S: ReadModelStore<AccountId, AccountReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> AccountsProjection<S>
where
    S: ReadModelStore<AccountId, AccountReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, account_id: &AccountId) -> Option<AccountReadModel> {
        self.store.get(account_id)
    }

    /// All open accounts, ordered by name then id.
    pub fn list(&self) -> Vec<AccountReadModel> {
        let mut all = self.store.list();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.account_id.cmp(&b.account_id)));
        all
    }

    fn update(&self, account_id: AccountId, f: impl FnOnce(&mut AccountReadModel)) {
        if let Some(mut rm) = self.store.get(&account_id) {
            f(&mut rm);
            self.store.upsert(account_id, rm);
        }
    }
}

impl<S> Projection for AccountsProjection<S>
where
    S: ReadModelStore<AccountId, AccountReadModel>,
{
    fn name(&self) -> &'static str {
        "accounts.listing"
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
                let mut rm = AccountReadModel {
                    account_id: e.account_id,
                    name: e.name,
                    currency: e.currency,
                    account_type: e.account_type,
                    begin_balance: e.begin_balance,
                    begin_balance_timestamp: e.begin_balance_timestamp,
                    credit_line: e.credit_line,
                    balance: e.begin_balance,
                    credit_available: Decimal::ZERO,
                    customers: e.customers,
                    movement_count: 0,
                };
                rm.refresh_credit();
                self.store.upsert(e.account_id, rm);
            }
            AccountEvent::AccountUpdated(e) => self.update(e.account_id, |rm| {
                rm.name = e.name;
                rm.credit_line = e.credit_line;
                rm.customers = e.customers;
                rm.refresh_credit();
            }),
            AccountEvent::MovementRecorded(e) => self.update(e.account_id, |rm| {
                rm.balance = e.balance_after;
                rm.movement_count += 1;
                rm.refresh_credit();
            }),
            AccountEvent::MovementRemoved(e) => self.update(e.account_id, |rm| {
                rm.balance = e.balance_after;
                rm.movement_count = rm.movement_count.saturating_sub(1);
                rm.refresh_credit();
            }),
            AccountEvent::AccountDeleted(e) => {
                self.store.remove(&e.account_id);
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

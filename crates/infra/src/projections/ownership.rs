//! Customer ↔ account ownership index.
//!
//! Answers "which accounts list this customer" without scanning every account.
//! The reverse direction (account → customers) is kept alongside so that an
//! `AccountUpdated` can be diffed against the previous owner set.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value as JsonValue;

use bankbook_accounts::{AccountEvent, AccountId};
use bankbook_core::CustomerId;
use bankbook_events::EventEnvelope;

use super::{CursorCheck, Projection, ProjectionError, StreamCursors, decode};
use crate::read_model::ReadModelStore;

/// Accounts currently listing one customer as an owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerAccounts {
    pub customer_id: CustomerId,
    pub accounts: BTreeSet<AccountId>,
}

#[derive(Debug)]
pub struct OwnershipIndexProjection<S>
where
    S: ReadModelStore<CustomerId, CustomerAccounts>,
{
    store: S,
    owners: RwLock<HashMap<AccountId, BTreeSet<CustomerId>>>,
    cursors: StreamCursors,
}

impl<S> OwnershipIndexProjection<S>
where
    S: ReadModelStore<CustomerId, CustomerAccounts>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            owners: RwLock::new(HashMap::new()),
            cursors: StreamCursors::new(),
        }
    }

    pub fn accounts_of(&self, customer_id: CustomerId) -> BTreeSet<AccountId> {
        self.store
            .get(&customer_id)
            .map(|entry| entry.accounts)
            .unwrap_or_default()
    }

    pub fn owners_of(&self, account_id: AccountId) -> BTreeSet<CustomerId> {
        self.owners
            .read()
            .ok()
            .and_then(|owners| owners.get(&account_id).cloned())
            .unwrap_or_default()
    }

    fn link(&self, customer_id: CustomerId, account_id: AccountId) {
        let mut entry = self.store.get(&customer_id).unwrap_or(CustomerAccounts {
            customer_id,
            accounts: BTreeSet::new(),
        });
        entry.accounts.insert(account_id);
        self.store.upsert(customer_id, entry);
    }

    fn unlink(&self, customer_id: CustomerId, account_id: AccountId) {
        if let Some(mut entry) = self.store.get(&customer_id) {
            entry.accounts.remove(&account_id);
            if entry.accounts.is_empty() {
                self.store.remove(&customer_id);
            } else {
                self.store.upsert(customer_id, entry);
            }
        }
    }

    /// Replace the owner set of `account_id`, adjusting both directions.
    fn set_owners(
        &self,
        account_id: AccountId,
        new_owners: BTreeSet<CustomerId>,
    ) -> Result<(), ProjectionError> {
        let mut owners = self
            .owners
            .write()
            .map_err(|_| ProjectionError::Poisoned("account owners"))?;
        let previous = owners.get(&account_id).cloned().unwrap_or_default();

        for removed in previous.difference(&new_owners) {
            self.unlink(*removed, account_id);
        }
        for added in new_owners.difference(&previous) {
            self.link(*added, account_id);
        }

        if new_owners.is_empty() {
            owners.remove(&account_id);
        } else {
            owners.insert(account_id, new_owners);
        }
        Ok(())
    }
}

impl<S> Projection for OwnershipIndexProjection<S>
where
    S: ReadModelStore<CustomerId, CustomerAccounts>,
{
    fn name(&self) -> &'static str {
        "accounts.ownership"
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
                self.set_owners(e.account_id, e.customers.into_iter().collect())?;
            }
            AccountEvent::AccountUpdated(e) => {
                self.set_owners(e.account_id, e.customers.into_iter().collect())?;
            }
            AccountEvent::AccountDeleted(e) => {
                self.set_owners(e.account_id, BTreeSet::new())?;
            }
            AccountEvent::MovementRecorded(_) | AccountEvent::MovementRemoved(_) => {}
        }

        self.cursors.advance(aggregate_id, seq)?;
        tracing::debug!(projection = self.name(), %aggregate_id, seq, "envelope applied");
        Ok(())
    }

    fn reset(&self) -> Result<(), ProjectionError> {
        self.store.clear();
        self.owners
            .write()
            .map_err(|_| ProjectionError::Poisoned("account owners"))?
            .clear();
        self.cursors.clear()
    }
}

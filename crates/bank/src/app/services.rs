//! The `Bank` service: event store, bus, dispatcher and read models wired together.
//!
//! Every mutating call is one atomic unit (load stream, decide, append, publish)
//! followed by a catch-up of the read models, so a query issued after a call
//! returns always reflects it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value as JsonValue;

use bankbook_accounts::{
    AGGREGATE_TYPE as ACCOUNT_STREAM, Account, AccountCommand, AccountEvent, AccountId,
    DeleteAccount, MovementId, OpenAccount, RecordMovement, RemoveMovement, UndoLastMovement,
};
use bankbook_core::{Advisory, AggregateId, CustomerId};
use bankbook_customers::{
    AGGREGATE_TYPE as CUSTOMER_STREAM, Customer, CustomerCommand, RegisterCustomer, RemoveCustomer,
    UpdateCustomer,
};
use bankbook_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use bankbook_infra::{
    command_dispatcher::CommandDispatcher,
    config::BankConfig,
    event_store::{EventStore, InMemoryEventStore, StoredEvent},
    projections::{
        AccountReadModel, AccountsProjection, CustomerAccounts, CustomerDirectoryProjection,
        CustomerReadModel, MovementReadModel, MovementsProjection, OwnershipIndexProjection,
        Projection,
    },
    read_model::InMemoryReadModelStore,
};

use crate::app::dto::{AccountChanges, AccountValues, CustomerValues, MovementValues};
use crate::app::errors::{BankError, in_context};

type Store = Arc<InMemoryEventStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Dispatcher = CommandDispatcher<Store, Bus>;

pub struct Bank {
    config: BankConfig,
    dispatcher: Dispatcher,
    /// Committed envelopes not yet applied to the read models.
    feed: Mutex<Subscription<EventEnvelope<JsonValue>>>,
    /// Serializes every change to the customer/account ownership relation.
    ownership_lock: Mutex<()>,
    accounts: AccountsProjection<InMemoryReadModelStore<AccountId, AccountReadModel>>,
    movements: MovementsProjection<InMemoryReadModelStore<MovementId, MovementReadModel>>,
    customers: CustomerDirectoryProjection<InMemoryReadModelStore<CustomerId, CustomerReadModel>>,
    ownership: OwnershipIndexProjection<InMemoryReadModelStore<CustomerId, CustomerAccounts>>,
}

impl Default for Bank {
    fn default() -> Self {
        Self::new(BankConfig::default())
    }
}

impl Bank {
    pub fn new(config: BankConfig) -> Self {
        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let feed = bus.subscribe();

        Self {
            config,
            dispatcher: CommandDispatcher::new(store, bus),
            feed: Mutex::new(feed),
            ownership_lock: Mutex::new(()),
            accounts: AccountsProjection::new(InMemoryReadModelStore::new()),
            movements: MovementsProjection::new(InMemoryReadModelStore::new()),
            customers: CustomerDirectoryProjection::new(InMemoryReadModelStore::new()),
            ownership: OwnershipIndexProjection::new(InMemoryReadModelStore::new()),
        }
    }

    /// Build from `BANKBOOK_DEFAULT_CURRENCY` / `RUST_LOG`.
    pub fn from_env() -> Result<Self, BankError> {
        Ok(Self::new(BankConfig::from_env()?))
    }

    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    /// Subscribe to every envelope committed after this call.
    pub fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        self.dispatcher.bus().subscribe()
    }

    // -------------------------
    // Customers
    // -------------------------

    pub fn create_customer(&self, values: CustomerValues) -> Result<CustomerReadModel, BankError> {
        let customer_id = CustomerId::new();
        let contact = values.contact();
        let command = CustomerCommand::RegisterCustomer(RegisterCustomer {
            customer_id,
            name: values.name.unwrap_or_default(),
            login: values.login.unwrap_or_default(),
            contact: Some(contact),
            occurred_at: Utc::now(),
        });

        self.dispatch_customer(customer_id, command)?;
        tracing::info!(%customer_id, "customer registered");
        self.customer(customer_id)
    }

    pub fn update_customer(
        &self,
        customer_id: CustomerId,
        values: CustomerValues,
    ) -> Result<CustomerReadModel, BankError> {
        let contact = values.contact_changes();
        let command = CustomerCommand::UpdateCustomer(UpdateCustomer {
            customer_id,
            name: values.name,
            login: values.login,
            contact,
            occurred_at: Utc::now(),
        });

        self.dispatch_customer(customer_id, command)?;
        tracing::info!(%customer_id, "customer updated");
        self.customer(customer_id)
    }

    /// Fails while any account still lists the customer as an owner.
    pub fn delete_customer(&self, customer_id: CustomerId) -> Result<(), BankError> {
        let _ownership = self.lock_ownership()?;
        self.catch_up()?;

        let owned_accounts = self.ownership.accounts_of(customer_id).len();
        let command = CustomerCommand::RemoveCustomer(RemoveCustomer {
            customer_id,
            owned_accounts,
            occurred_at: Utc::now(),
        });

        self.dispatch_customer(customer_id, command)?;
        tracing::info!(%customer_id, "customer removed");
        Ok(())
    }

    /// Warnings for every value that would be rejected; never blocks.
    pub fn preview_customer(&self, values: &CustomerValues) -> Vec<Advisory> {
        bankbook_customers::advise(values.login.as_deref(), &values.contact())
    }

    // -------------------------
    // Accounts
    // -------------------------

    /// Open an account on behalf of `actor`, who becomes the sole owner unless
    /// `values.customers` says otherwise.
    pub fn create_account(
        &self,
        actor: CustomerId,
        values: AccountValues,
    ) -> Result<AccountReadModel, BankError> {
        let _ownership = self.lock_ownership()?;

        let owners = values.customers.clone().unwrap_or_else(|| vec![actor]);
        self.ensure_customers_exist(&owners)?;

        let account_id = AccountId::new(AggregateId::new());
        let command = AccountCommand::OpenAccount(OpenAccount {
            account_id,
            name: values.name,
            currency: values
                .currency
                .unwrap_or_else(|| self.config.default_currency.clone()),
            begin_balance: values.begin_balance,
            begin_balance_timestamp: values.begin_balance_timestamp,
            credit_line: values.credit_line,
            account_type: values.account_type,
            customers: values.customers,
            opened_by: actor,
            occurred_at: Utc::now(),
        });

        self.dispatch_account(account_id, command)?;
        tracing::info!(%account_id, opened_by = %actor, "account opened");
        self.account(account_id)
    }

    pub fn update_account(
        &self,
        account_id: AccountId,
        changes: AccountChanges,
    ) -> Result<AccountReadModel, BankError> {
        let _ownership = self.lock_ownership()?;

        if let Some(owners) = &changes.customers {
            self.ensure_customers_exist(owners)?;
        }

        let command = AccountCommand::UpdateAccount(changes.into_command(account_id, Utc::now()));
        self.dispatch_account(account_id, command)?;
        tracing::info!(%account_id, "account updated");
        self.account(account_id)
    }

    /// Fails while the account still has movements.
    pub fn delete_account(&self, account_id: AccountId) -> Result<(), BankError> {
        let _ownership = self.lock_ownership()?;

        let command = AccountCommand::DeleteAccount(DeleteAccount {
            account_id,
            occurred_at: Utc::now(),
        });
        self.dispatch_account(account_id, command)?;
        tracing::info!(%account_id, "account deleted");
        Ok(())
    }

    /// Advisories for a prospective change: protected fields and credit lines on
    /// STANDARD accounts.
    pub fn preview_account_update(
        &self,
        account_id: AccountId,
        changes: AccountChanges,
    ) -> Result<Vec<Advisory>, BankError> {
        let account = self.load_account(account_id)?;
        Ok(account.advise(&changes.into_command(account_id, Utc::now())))
    }

    // -------------------------
    // Movements
    // -------------------------

    pub fn create_movement(&self, values: MovementValues) -> Result<MovementReadModel, BankError> {
        let account_id = values.account;
        let movement_id = MovementId::new();
        let command = AccountCommand::RecordMovement(RecordMovement {
            account_id,
            movement_id,
            kind: values.kind,
            amount: values.amount,
            occurred_at: Utc::now(),
        });

        self.dispatch_account(account_id, command)?;
        tracing::info!(%account_id, %movement_id, kind = ?values.kind, amount = %values.amount, "movement recorded");
        self.movement(movement_id)
    }

    /// Only the most recent movement of its account may be deleted.
    pub fn delete_movement(&self, movement_id: MovementId) -> Result<(), BankError> {
        let account_id = self.movement(movement_id)?.account_id;
        let command = AccountCommand::RemoveMovement(RemoveMovement {
            account_id,
            movement_id,
            occurred_at: Utc::now(),
        });

        self.dispatch_account(account_id, command)
            .map_err(|err| match err {
                BankError::NotFound(_) => BankError::not_found("movement", movement_id),
                other => other,
            })?;
        tracing::info!(%account_id, %movement_id, "movement deleted");
        Ok(())
    }

    /// Remove the most recent movement of `account_id`; `None` when the ledger is empty.
    pub fn undo_last_movement(&self, account_id: AccountId) -> Result<Option<MovementId>, BankError> {
        let command = AccountCommand::UndoLastMovement(UndoLastMovement {
            account_id,
            occurred_at: Utc::now(),
        });

        let committed = self.dispatch_account(account_id, command)?;
        let removed = committed.iter().find_map(|stored| {
            match serde_json::from_value::<AccountEvent>(stored.payload.clone()) {
                Ok(AccountEvent::MovementRemoved(e)) => Some(e.movement_id),
                _ => None,
            }
        });

        if let Some(movement_id) = removed {
            tracing::info!(%account_id, %movement_id, "last movement undone");
        }
        Ok(removed)
    }

    // -------------------------
    // Queries
    // -------------------------

    pub fn account(&self, account_id: AccountId) -> Result<AccountReadModel, BankError> {
        self.catch_up()?;
        self.accounts
            .get(&account_id)
            .ok_or_else(|| BankError::not_found("account", account_id))
    }

    pub fn accounts(&self) -> Result<Vec<AccountReadModel>, BankError> {
        self.catch_up()?;
        Ok(self.accounts.list())
    }

    /// Accounts whose owners include `customer_id`.
    pub fn accounts_of_customer(&self, customer_id: CustomerId) -> Result<Vec<AccountReadModel>, BankError> {
        self.catch_up()?;
        Ok(self
            .ownership
            .accounts_of(customer_id)
            .into_iter()
            .filter_map(|account_id| self.accounts.get(&account_id))
            .collect())
    }

    /// Ledger of one account, most recent first.
    pub fn movements(&self, account_id: AccountId) -> Result<Vec<MovementReadModel>, BankError> {
        self.account(account_id)?;
        Ok(self.movements.by_account(account_id))
    }

    /// The only movement of the account that may currently be deleted.
    pub fn latest_movement(&self, account_id: AccountId) -> Result<Option<MovementReadModel>, BankError> {
        self.account(account_id)?;
        Ok(self.movements.latest(account_id))
    }

    pub fn movement(&self, movement_id: MovementId) -> Result<MovementReadModel, BankError> {
        self.catch_up()?;
        self.movements
            .get(&movement_id)
            .ok_or_else(|| BankError::not_found("movement", movement_id))
    }

    pub fn customer(&self, customer_id: CustomerId) -> Result<CustomerReadModel, BankError> {
        self.catch_up()?;
        self.customers
            .get(&customer_id)
            .ok_or_else(|| BankError::not_found("customer", customer_id))
    }

    pub fn customers(&self) -> Result<Vec<CustomerReadModel>, BankError> {
        self.catch_up()?;
        Ok(self.customers.list())
    }

    // -------------------------
    // Read model maintenance
    // -------------------------

    /// Apply every pending committed envelope to the read models.
    ///
    /// An envelope a projection refuses leaves the read models behind the store,
    /// so they are rebuilt from the store before returning.
    pub fn catch_up(&self) -> Result<(), BankError> {
        let feed = self.lock_feed()?;

        for envelope in feed.drain() {
            for projection in self.projections() {
                if let Err(err) = projection.apply_envelope(&envelope) {
                    tracing::warn!(
                        projection = projection.name(),
                        aggregate_id = %envelope.aggregate_id(),
                        sequence_number = envelope.sequence_number(),
                        error = %err,
                        "projection fell behind; rebuilding read models"
                    );
                    return self.rebuild_locked(&feed);
                }
            }
        }
        Ok(())
    }

    /// Discard the read models and replay them from the event store.
    pub fn rebuild_read_models(&self) -> Result<(), BankError> {
        let feed = self.lock_feed()?;
        self.rebuild_locked(&feed)
    }

    fn rebuild_locked(&self, feed: &Subscription<EventEnvelope<JsonValue>>) -> Result<(), BankError> {
        // Everything pending is already in the store; later deliveries of it are
        // skipped by the stream cursors.
        let skipped = feed.drain().len();

        let store = self.dispatcher.store();
        let accounts = envelopes(store.load_all(ACCOUNT_STREAM)?);
        let customers = envelopes(store.load_all(CUSTOMER_STREAM)?);

        self.accounts.rebuild_from_scratch(accounts.clone())?;
        self.movements.rebuild_from_scratch(accounts.clone())?;
        self.ownership.rebuild_from_scratch(accounts)?;
        self.customers.rebuild_from_scratch(customers)?;

        tracing::info!(skipped, "read models rebuilt");
        Ok(())
    }

    fn projections(&self) -> [&dyn Projection; 4] {
        [&self.accounts, &self.movements, &self.customers, &self.ownership]
    }

    // -------------------------
    // Internals
    // -------------------------

    fn lock_feed(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Subscription<EventEnvelope<JsonValue>>>, BankError> {
        self.feed
            .lock()
            .map_err(|_| BankError::Internal("projection feed poisoned".to_string()))
    }

    fn lock_ownership(&self) -> Result<std::sync::MutexGuard<'_, ()>, BankError> {
        self.ownership_lock
            .lock()
            .map_err(|_| BankError::Internal("ownership lock poisoned".to_string()))
    }

    /// Owners are checked against the customer streams, not the read model.
    fn ensure_customers_exist(&self, customers: &[CustomerId]) -> Result<(), BankError> {
        let unique: BTreeSet<_> = customers.iter().copied().collect();
        for customer_id in unique {
            let customer = self
                .dispatcher
                .load(customer_id.into(), |id| Customer::empty(id.into()))?;
            if !customer.is_active() {
                return Err(BankError::Validation(format!(
                    "customer {customer_id} does not exist"
                )));
            }
        }
        Ok(())
    }

    fn load_account(&self, account_id: AccountId) -> Result<Account, BankError> {
        let account = self
            .dispatcher
            .load(account_id.0, |id| Account::empty(AccountId::new(id)))?;
        if !account.is_open() {
            return Err(BankError::not_found("account", account_id));
        }
        Ok(account)
    }

    fn dispatch_account(
        &self,
        account_id: AccountId,
        command: AccountCommand,
    ) -> Result<Vec<StoredEvent>, BankError> {
        let committed = self
            .dispatcher
            .dispatch(account_id.0, ACCOUNT_STREAM, command, |id| {
                Account::empty(AccountId::new(id))
            })
            .map_err(in_context("account", account_id))?;
        self.catch_up()?;
        Ok(committed)
    }

    fn dispatch_customer(
        &self,
        customer_id: CustomerId,
        command: CustomerCommand,
    ) -> Result<Vec<StoredEvent>, BankError> {
        let committed = self
            .dispatcher
            .dispatch(customer_id.into(), CUSTOMER_STREAM, command, |id| {
                Customer::empty(id.into())
            })
            .map_err(in_context("customer", customer_id))?;
        self.catch_up()?;
        Ok(committed)
    }
}

fn envelopes(stored: Vec<StoredEvent>) -> Vec<EventEnvelope<JsonValue>> {
    stored.iter().map(StoredEvent::to_envelope).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::ErrorKind;
    use bankbook_accounts::{AccountType, MovementKind};
    use rust_decimal::Decimal;

    fn customer(bank: &Bank, name: &str) -> CustomerId {
        bank.create_customer(CustomerValues {
            name: Some(name.to_string()),
            login: Some(format!("{}@bank.example", name.to_lowercase())),
            ..Default::default()
        })
        .unwrap()
        .customer_id
    }

    fn account_values(begin: i64) -> AccountValues {
        AccountValues {
            name: "Checking".to_string(),
            currency: None,
            begin_balance: Decimal::from(begin),
            begin_balance_timestamp: None,
            credit_line: Decimal::ZERO,
            account_type: AccountType::Standard,
            customers: None,
        }
    }

    #[test]
    fn account_currency_defaults_to_configuration() {
        let bank = Bank::default();
        let owner = customer(&bank, "Ana");

        let account = bank.create_account(owner, account_values(10)).unwrap();
        assert_eq!(account.currency, bank.config().default_currency);
        assert_eq!(account.customers, vec![owner]);
    }

    #[test]
    fn owners_must_exist() {
        let bank = Bank::default();
        let owner = customer(&bank, "Ana");
        let mut values = account_values(0);
        values.customers = Some(vec![owner, CustomerId::new()]);

        let err = bank.create_account(owner, values).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(bank.accounts().unwrap().is_empty());
    }

    #[test]
    fn unknown_records_are_not_found() {
        let bank = Bank::default();
        let missing = AccountId::new(AggregateId::new());

        assert_eq!(bank.account(missing).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(bank.delete_account(missing).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            bank.delete_movement(MovementId::new()).unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            bank.update_customer(CustomerId::new(), CustomerValues::default())
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn undo_reports_the_removed_movement() {
        let bank = Bank::default();
        let owner = customer(&bank, "Ana");
        let account = bank.create_account(owner, account_values(0)).unwrap().account_id;

        assert_eq!(bank.undo_last_movement(account).unwrap(), None);

        let deposit = bank
            .create_movement(MovementValues {
                account,
                kind: MovementKind::Deposit,
                amount: Decimal::from(5),
            })
            .unwrap();
        assert_eq!(bank.undo_last_movement(account).unwrap(), Some(deposit.movement_id));
        assert_eq!(bank.account(account).unwrap().balance, Decimal::ZERO);
    }

    #[test]
    fn read_models_recover_when_a_projection_falls_behind() {
        let bank = Bank::default();
        let owner = customer(&bank, "Ana");
        let account = bank.create_account(owner, account_values(100)).unwrap().account_id;
        let deposit = bank
            .create_movement(MovementValues {
                account,
                kind: MovementKind::Deposit,
                amount: Decimal::from(5),
            })
            .unwrap();

        // The next envelope of this account is now a gap for the movement index.
        bank.movements.reset().unwrap();

        let payment = bank
            .create_movement(MovementValues {
                account,
                kind: MovementKind::Payment,
                amount: Decimal::from(3),
            })
            .unwrap();

        let ledger: Vec<MovementId> = bank
            .movements(account)
            .unwrap()
            .into_iter()
            .map(|m| m.movement_id)
            .collect();
        assert_eq!(ledger, vec![payment.movement_id, deposit.movement_id]);
        assert_eq!(bank.account(account).unwrap().balance, Decimal::from(102));
    }

    #[test]
    fn subscribers_see_committed_envelopes() {
        let bank = Bank::default();
        let feed = bank.subscribe();
        let owner = customer(&bank, "Ana");

        let envelopes = feed.drain();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].aggregate_type(), CUSTOMER_STREAM);
        assert_eq!(envelopes[0].aggregate_id(), AggregateId::from(owner));
    }
}

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bankbook_core::{
    Advisory, Aggregate, AggregateId, AggregateRoot, Currency, CustomerId, DomainError,
};
use bankbook_events::Event;

use crate::movement::{self, Movement, MovementId, MovementKind};

/// Stream type of every account stream.
pub const AGGREGATE_TYPE: &str = "accounts.account";

/// Account identifier (aggregate id).
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(pub AggregateId);

impl AccountId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for AccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// `credit_line − |min(balance, 0)|` for CREDIT accounts, zero otherwise.
pub fn credit_available(account_type: AccountType, credit_line: Decimal, balance: Decimal) -> Decimal {
    match account_type {
        AccountType::Credit => credit_line - balance.min(Decimal::ZERO).abs(),
        AccountType::Standard => Decimal::ZERO,
    }
}

/// Account type, fixed at opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    #[default]
    Standard,
    /// Payments may draw on the credit line.
    Credit,
}

/// Aggregate root: Account.
///
/// # Invariants
/// - `balance == begin_balance + Σ deposits − Σ payments` over `movements`.
/// - `begin_balance` and `account_type` never change after opening.
/// - `customers` is never empty; `begin_balance` and `credit_line` are never negative.
/// - Movements are appended, and only the most recent one can be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    name: String,
    currency: Currency,
    begin_balance: Decimal,
    begin_balance_timestamp: Option<DateTime<Utc>>,
    credit_line: Decimal,
    account_type: AccountType,
    customers: BTreeSet<CustomerId>,
    movements: Vec<Movement>,
    balance: Decimal,
    next_sequence: u64,
    version: u64,
    created: bool,
    deleted: bool,
}

impl Account {
    /// Empty aggregate for rehydration.
    pub fn empty(id: AccountId) -> Self {
        Self {
            id,
            name: String::new(),
            currency: Currency::default(),
            begin_balance: Decimal::ZERO,
            begin_balance_timestamp: None,
            credit_line: Decimal::ZERO,
            account_type: AccountType::Standard,
            customers: BTreeSet::new(),
            movements: Vec::new(),
            balance: Decimal::ZERO,
            next_sequence: 1,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn begin_balance(&self) -> Decimal {
        self.begin_balance
    }

    pub fn begin_balance_timestamp(&self) -> Option<DateTime<Utc>> {
        self.begin_balance_timestamp
    }

    pub fn credit_line(&self) -> Decimal {
        self.credit_line
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn customers(&self) -> &BTreeSet<CustomerId> {
        &self.customers
    }

    /// Movements in the order they were recorded.
    pub fn movements(&self) -> &[Movement] {
        &self.movements
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn is_open(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// The movement that may currently be removed, if any.
    pub fn latest_movement(&self) -> Option<&Movement> {
        movement::latest(&self.movements)
    }

    pub fn movement(&self, movement_id: MovementId) -> Option<&Movement> {
        self.movements.iter().find(|m| m.id_typed() == movement_id)
    }

    /// Credit line usable by payments: the full line for CREDIT accounts, zero otherwise.
    pub fn applicable_credit(&self) -> Decimal {
        match self.account_type {
            AccountType::Credit => self.credit_line,
            AccountType::Standard => Decimal::ZERO,
        }
    }

    /// Remaining credit after covering any overdraft (CREDIT accounts only).
    pub fn credit_available(&self) -> Decimal {
        credit_available(self.account_type, self.credit_line, self.balance)
    }

    /// Ceiling for the next payment: current balance plus applicable credit.
    pub fn available_funds(&self) -> Decimal {
        self.balance.saturating_add(self.applicable_credit())
    }

    /// Non-blocking warnings for a prospective change set.
    pub fn advise(&self, changes: &UpdateAccount) -> Vec<Advisory> {
        let mut advisories = Vec::new();
        if changes.begin_balance.is_some() || changes.account_type.is_some() {
            advisories.push(Advisory::new(
                if changes.begin_balance.is_some() { "begin_balance" } else { "account_type" },
                "Modification prohibited",
                "The opening balance and the account type cannot be changed once the account exists.",
            ));
        }
        if changes.credit_line.is_some() && self.account_type == AccountType::Standard {
            advisories.push(Advisory::new(
                "credit_line",
                "Invalid action",
                "The credit line only applies to CREDIT accounts.",
            ));
        }
        advisories
    }

    /// Ledger balance over every movement except `excluded`.
    fn ledger_balance_excluding(&self, excluded: MovementId) -> Result<Decimal, DomainError> {
        movement::ledger_balance(
            self.begin_balance,
            self.movements.iter().filter(|m| m.id_typed() != excluded),
        )
        .ok_or_else(balance_out_of_range)
    }
}

impl AggregateRoot for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub account_id: AccountId,
    pub name: String,
    pub currency: Currency,
    pub begin_balance: Decimal,
    /// Defaults to `occurred_at`.
    pub begin_balance_timestamp: Option<DateTime<Utc>>,
    pub credit_line: Decimal,
    pub account_type: AccountType,
    /// Owning customers; `None` means "the acting principal only".
    pub customers: Option<Vec<CustomerId>>,
    /// Acting principal.
    pub opened_by: CustomerId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateAccount.
///
/// `begin_balance` and `account_type` are present so that a caller's attempt to
/// change them can be rejected; any value there fails the command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateAccount {
    pub account_id: AccountId,
    pub name: Option<String>,
    pub credit_line: Option<Decimal>,
    pub customers: Option<Vec<CustomerId>>,
    pub begin_balance: Option<Decimal>,
    pub account_type: Option<AccountType>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub account_id: AccountId,
    pub movement_id: MovementId,
    pub kind: MovementKind,
    pub amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveMovement {
    pub account_id: AccountId,
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UndoLastMovement (no-op on an empty ledger).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoLastMovement {
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteAccount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAccount {
    pub account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    OpenAccount(OpenAccount),
    UpdateAccount(UpdateAccount),
    RecordMovement(RecordMovement),
    RemoveMovement(RemoveMovement),
    UndoLastMovement(UndoLastMovement),
    DeleteAccount(DeleteAccount),
}

/// Event: AccountOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub account_id: AccountId,
    pub name: String,
    pub currency: Currency,
    pub begin_balance: Decimal,
    pub begin_balance_timestamp: DateTime<Utc>,
    pub credit_line: Decimal,
    pub account_type: AccountType,
    pub customers: Vec<CustomerId>,
    pub opened_by: CustomerId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountUpdated (carries the full set of mutable fields after the change).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdated {
    pub account_id: AccountId,
    pub name: String,
    pub credit_line: Decimal,
    pub customers: Vec<CustomerId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub account_id: AccountId,
    pub movement_id: MovementId,
    pub sequence: u64,
    pub kind: MovementKind,
    pub amount: Decimal,
    /// Account balance after this movement.
    pub balance_after: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRemoved {
    pub account_id: AccountId,
    pub movement_id: MovementId,
    /// Account balance after the removal.
    pub balance_after: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AccountDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDeleted {
    pub account_id: AccountId,
    pub customers: Vec<CustomerId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    AccountOpened(AccountOpened),
    AccountUpdated(AccountUpdated),
    MovementRecorded(MovementRecorded),
    MovementRemoved(MovementRemoved),
    AccountDeleted(AccountDeleted),
}

impl AccountEvent {
    pub fn account_id(&self) -> AccountId {
        match self {
            AccountEvent::AccountOpened(e) => e.account_id,
            AccountEvent::AccountUpdated(e) => e.account_id,
            AccountEvent::MovementRecorded(e) => e.account_id,
            AccountEvent::MovementRemoved(e) => e.account_id,
            AccountEvent::AccountDeleted(e) => e.account_id,
        }
    }
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountOpened(_) => "accounts.account.opened",
            AccountEvent::AccountUpdated(_) => "accounts.account.updated",
            AccountEvent::MovementRecorded(_) => "accounts.account.movement_recorded",
            AccountEvent::MovementRemoved(_) => "accounts.account.movement_removed",
            AccountEvent::AccountDeleted(_) => "accounts.account.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::AccountOpened(e) => e.occurred_at,
            AccountEvent::AccountUpdated(e) => e.occurred_at,
            AccountEvent::MovementRecorded(e) => e.occurred_at,
            AccountEvent::MovementRemoved(e) => e.occurred_at,
            AccountEvent::AccountDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Account {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::AccountOpened(e) => {
                self.id = e.account_id;
                self.name = e.name.clone();
                self.currency = e.currency.clone();
                self.begin_balance = e.begin_balance;
                self.begin_balance_timestamp = Some(e.begin_balance_timestamp);
                self.credit_line = e.credit_line;
                self.account_type = e.account_type;
                self.customers = e.customers.iter().copied().collect();
                self.created = true;
                self.balance = e.begin_balance;
            }
            AccountEvent::AccountUpdated(e) => {
                self.name = e.name.clone();
                self.credit_line = e.credit_line;
                self.customers = e.customers.iter().copied().collect();
            }
            AccountEvent::MovementRecorded(e) => {
                self.movements.push(Movement::new(
                    e.movement_id,
                    e.sequence,
                    e.kind,
                    e.amount,
                    e.occurred_at,
                    e.balance_after,
                ));
                self.next_sequence = self.next_sequence.max(e.sequence + 1);
                self.balance = e.balance_after;
            }
            AccountEvent::MovementRemoved(e) => {
                self.movements.retain(|m| m.id_typed() != e.movement_id);
                self.balance = e.balance_after;
            }
            AccountEvent::AccountDeleted(_) => {
                self.deleted = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountCommand::OpenAccount(cmd) => self.handle_open(cmd),
            AccountCommand::UpdateAccount(cmd) => self.handle_update(cmd),
            AccountCommand::RecordMovement(cmd) => self.handle_record(cmd),
            AccountCommand::RemoveMovement(cmd) => self.handle_remove(cmd),
            AccountCommand::UndoLastMovement(cmd) => self.handle_undo_last(cmd),
            AccountCommand::DeleteAccount(cmd) => self.handle_delete(cmd),
        }
    }
}

/// Rules checked on every commit that opens or changes an account.
fn validate_terms(
    name: &str,
    begin_balance: Decimal,
    credit_line: Decimal,
    customers: &[CustomerId],
) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("account name cannot be empty"));
    }
    if customers.is_empty() {
        return Err(DomainError::validation(
            "an account must have at least one associated customer",
        ));
    }
    if credit_line < Decimal::ZERO {
        return Err(DomainError::validation("the credit line limit cannot be negative"));
    }
    if begin_balance < Decimal::ZERO {
        return Err(DomainError::validation("the opening balance cannot be negative"));
    }
    Ok(())
}

fn balance_out_of_range() -> DomainError {
    DomainError::validation("amount exceeds the representable balance")
}

fn dedup_customers(customers: &[CustomerId]) -> Vec<CustomerId> {
    customers
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl Account {
    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.is_open() {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_account_id(&self, account_id: AccountId) -> Result<(), DomainError> {
        if self.id != account_id {
            return Err(DomainError::invalid_id("account_id mismatch"));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenAccount) -> Result<Vec<AccountEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("account already exists"));
        }

        let customers = match &cmd.customers {
            Some(customers) => dedup_customers(customers),
            None => vec![cmd.opened_by],
        };
        validate_terms(&cmd.name, cmd.begin_balance, cmd.credit_line, &customers)?;

        Ok(vec![AccountEvent::AccountOpened(AccountOpened {
            account_id: cmd.account_id,
            name: cmd.name.trim().to_string(),
            currency: cmd.currency.clone(),
            begin_balance: cmd.begin_balance,
            begin_balance_timestamp: cmd.begin_balance_timestamp.unwrap_or(cmd.occurred_at),
            credit_line: cmd.credit_line,
            account_type: cmd.account_type,
            customers,
            opened_by: cmd.opened_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateAccount) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_account_id(cmd.account_id)?;

        if cmd.begin_balance.is_some() {
            return Err(DomainError::immutability(
                "the opening balance cannot be changed after creation",
            ));
        }
        if cmd.account_type.is_some() {
            return Err(DomainError::immutability(
                "the account type cannot be changed after creation",
            ));
        }

        let name = cmd
            .name
            .as_deref()
            .map(str::trim)
            .unwrap_or(&self.name)
            .to_string();
        let credit_line = cmd.credit_line.unwrap_or(self.credit_line);
        let customers = match &cmd.customers {
            Some(customers) => dedup_customers(customers),
            None => self.customers.iter().copied().collect(),
        };
        validate_terms(&name, self.begin_balance, credit_line, &customers)?;

        Ok(vec![AccountEvent::AccountUpdated(AccountUpdated {
            account_id: cmd.account_id,
            name,
            credit_line,
            customers,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Amount and liquidity rules for a movement about to be recorded.
    ///
    /// Returns the ledger balance the movement is applied on top of. The movement's
    /// own id is excluded from that balance so it is never counted against itself.
    fn check_liquidity(
        &self,
        movement_id: MovementId,
        kind: MovementKind,
        amount: Decimal,
    ) -> Result<Decimal, DomainError> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::validation("the amount must be greater than 0"));
        }

        let prior_balance = self.ledger_balance_excluding(movement_id)?;

        if kind == MovementKind::Payment {
            let credit = self.applicable_credit();
            // An unrepresentable ceiling covers every representable payment.
            match prior_balance.checked_add(credit) {
                Some(available) if amount > available => {
                    return Err(DomainError::validation(format!(
                        "insufficient funds: available {:.2} (balance {:.2} + credit {:.2}), attempted payment {:.2}",
                        available, prior_balance, credit, amount
                    )));
                }
                _ => {}
            }
        }

        Ok(prior_balance)
    }

    fn handle_record(&self, cmd: &RecordMovement) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_account_id(cmd.account_id)?;

        if self.movement(cmd.movement_id).is_some() {
            return Err(DomainError::conflict(format!(
                "movement {} is already recorded",
                cmd.movement_id
            )));
        }

        let prior_balance = self.check_liquidity(cmd.movement_id, cmd.kind, cmd.amount)?;
        let balance_after = prior_balance
            .checked_add(cmd.kind.signed(cmd.amount))
            .ok_or_else(balance_out_of_range)?;

        Ok(vec![AccountEvent::MovementRecorded(MovementRecorded {
            account_id: cmd.account_id,
            movement_id: cmd.movement_id,
            sequence: self.next_sequence,
            kind: cmd.kind,
            amount: cmd.amount,
            balance_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn removal_of(
        &self,
        target: &Movement,
        occurred_at: DateTime<Utc>,
    ) -> Result<AccountEvent, DomainError> {
        Ok(AccountEvent::MovementRemoved(MovementRemoved {
            account_id: self.id,
            movement_id: target.id_typed(),
            balance_after: self.ledger_balance_excluding(target.id_typed())?,
            occurred_at,
        }))
    }

    fn handle_remove(&self, cmd: &RemoveMovement) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_account_id(cmd.account_id)?;

        let target = self.movement(cmd.movement_id).ok_or_else(DomainError::not_found)?;
        let latest = self.latest_movement().map(Movement::id_typed);
        if latest != Some(target.id_typed()) {
            return Err(DomainError::integrity(
                "only the most recent movement of an account can be deleted",
            ));
        }

        Ok(vec![self.removal_of(target, cmd.occurred_at)?])
    }

    fn handle_undo_last(&self, cmd: &UndoLastMovement) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_account_id(cmd.account_id)?;

        self.latest_movement()
            .map(|last| self.removal_of(last, cmd.occurred_at))
            .into_iter()
            .collect()
    }

    fn handle_delete(&self, cmd: &DeleteAccount) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_account_id(cmd.account_id)?;

        if !self.movements.is_empty() {
            return Err(DomainError::integrity(
                "cannot delete an account that has movements",
            ));
        }

        Ok(vec![AccountEvent::AccountDeleted(AccountDeleted {
            account_id: cmd.account_id,
            customers: self.customers.iter().copied().collect(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankbook_events::execute;
    use chrono::Duration;
    use proptest::prelude::*;

    fn test_account_id() -> AccountId {
        AccountId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn eur() -> Currency {
        Currency::new("EUR").unwrap()
    }

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn open_cmd(
        account_id: AccountId,
        account_type: AccountType,
        begin_balance: i64,
        credit_line: i64,
    ) -> OpenAccount {
        OpenAccount {
            account_id,
            name: "Household".to_string(),
            currency: eur(),
            begin_balance: dec(begin_balance),
            begin_balance_timestamp: None,
            credit_line: dec(credit_line),
            account_type,
            customers: None,
            opened_by: CustomerId::new(),
            occurred_at: test_time(),
        }
    }

    fn opened(account_type: AccountType, begin_balance: i64, credit_line: i64) -> Account {
        let id = test_account_id();
        let mut account = Account::empty(id);
        execute(
            &mut account,
            &AccountCommand::OpenAccount(open_cmd(id, account_type, begin_balance, credit_line)),
        )
        .unwrap();
        account
    }

    fn record_exact(
        account: &mut Account,
        kind: MovementKind,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<MovementId, DomainError> {
        let movement_id = MovementId::new();
        let cmd = AccountCommand::RecordMovement(RecordMovement {
            account_id: account.id_typed(),
            movement_id,
            kind,
            amount,
            occurred_at: at,
        });
        execute(account, &cmd)?;
        Ok(movement_id)
    }

    fn record_at(
        account: &mut Account,
        kind: MovementKind,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<MovementId, DomainError> {
        record_exact(account, kind, dec(amount), at)
    }

    fn record(account: &mut Account, kind: MovementKind, amount: i64) -> Result<MovementId, DomainError> {
        record_at(account, kind, amount, test_time())
    }

    fn remove(account: &mut Account, movement_id: MovementId) -> Result<Vec<AccountEvent>, DomainError> {
        let cmd = AccountCommand::RemoveMovement(RemoveMovement {
            account_id: account.id_typed(),
            movement_id,
            occurred_at: test_time(),
        });
        execute(account, &cmd)
    }

    fn update(account: &Account) -> UpdateAccount {
        UpdateAccount {
            account_id: account.id_typed(),
            occurred_at: test_time(),
            ..UpdateAccount::default()
        }
    }

    #[test]
    fn open_account_defaults_customers_to_acting_principal() {
        let id = test_account_id();
        let cmd = open_cmd(id, AccountType::Standard, 100, 0);
        let acting = cmd.opened_by;

        let events = Account::empty(id)
            .handle(&AccountCommand::OpenAccount(cmd))
            .unwrap();

        match &events[0] {
            AccountEvent::AccountOpened(e) => {
                assert_eq!(e.customers, vec![acting]);
                assert_eq!(e.begin_balance_timestamp, e.occurred_at);
            }
            other => panic!("Expected AccountOpened, got {other:?}"),
        }
    }

    #[test]
    fn open_account_sets_balance_to_begin_balance() {
        let account = opened(AccountType::Standard, 100, 0);
        assert_eq!(account.balance(), dec(100));
        assert!(account.is_open());
        assert_eq!(account.version(), 1);
    }

    #[test]
    fn open_account_rejects_explicitly_empty_customers() {
        let id = test_account_id();
        let mut cmd = open_cmd(id, AccountType::Standard, 0, 0);
        cmd.customers = Some(vec![]);

        let err = Account::empty(id)
            .handle(&AccountCommand::OpenAccount(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("at least one")));
    }

    #[test]
    fn open_account_rejects_negative_amounts_and_blank_name() {
        let id = test_account_id();
        let account = Account::empty(id);

        let negative_begin = open_cmd(id, AccountType::Standard, -1, 0);
        let negative_credit = open_cmd(id, AccountType::Credit, 0, -5);
        let mut blank_name = open_cmd(id, AccountType::Standard, 0, 0);
        blank_name.name = "  ".to_string();

        for cmd in [negative_begin, negative_credit, blank_name] {
            let err = account.handle(&AccountCommand::OpenAccount(cmd)).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "got {err:?}");
        }
    }

    #[test]
    fn open_account_twice_is_a_conflict() {
        let account = opened(AccountType::Standard, 0, 0);
        let cmd = open_cmd(account.id_typed(), AccountType::Standard, 0, 0);
        let err = account.handle(&AccountCommand::OpenAccount(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn standard_account_scenario() {
        let mut account = opened(AccountType::Standard, 100, 0);

        record(&mut account, MovementKind::Deposit, 50).unwrap();
        assert_eq!(account.balance(), dec(150));

        record(&mut account, MovementKind::Payment, 150).unwrap();
        assert_eq!(account.balance(), Decimal::ZERO);

        let err = record(&mut account, MovementKind::Payment, 1).unwrap_err();
        match err {
            DomainError::Validation(msg) => {
                assert!(msg.contains("insufficient funds"));
                assert!(msg.contains("available 0.00"));
            }
            other => panic!("Expected insufficient funds, got {other:?}"),
        }
        assert_eq!(account.balance(), Decimal::ZERO);
        assert_eq!(account.movements().len(), 2);
    }

    #[test]
    fn credit_account_scenario() {
        let mut account = opened(AccountType::Credit, 0, 200);

        record(&mut account, MovementKind::Payment, 200).unwrap();
        assert_eq!(account.balance(), dec(-200));
        assert_eq!(account.credit_available(), Decimal::ZERO);

        let err = record(&mut account, MovementKind::Payment, 1).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("insufficient funds")));
    }

    #[test]
    fn credit_line_is_ignored_for_standard_accounts() {
        let mut account = opened(AccountType::Standard, 10, 500);
        assert_eq!(account.available_funds(), dec(10));
        assert!(record(&mut account, MovementKind::Payment, 11).is_err());
        assert!(record(&mut account, MovementKind::Payment, 10).is_ok());
    }

    #[test]
    fn payment_equal_to_available_funds_succeeds() {
        let mut account = opened(AccountType::Credit, 30, 20);
        record(&mut account, MovementKind::Payment, 50).unwrap();
        assert_eq!(account.balance(), dec(-20));
    }

    #[test]
    fn non_positive_amounts_are_rejected_for_both_kinds() {
        let mut account = opened(AccountType::Standard, 100, 0);
        for kind in [MovementKind::Deposit, MovementKind::Payment] {
            for amount in [0, -5] {
                let err = record(&mut account, kind, amount).unwrap_err();
                assert!(
                    matches!(&err, DomainError::Validation(msg) if msg.contains("greater than 0")),
                    "{kind} {amount}: {err:?}"
                );
            }
        }
        assert!(account.movements().is_empty());
    }

    #[test]
    fn deposits_are_not_liquidity_checked() {
        let mut account = opened(AccountType::Standard, 0, 0);
        record(&mut account, MovementKind::Deposit, 1_000_000).unwrap();
        assert_eq!(account.balance(), dec(1_000_000));
    }

    #[test]
    fn deposit_past_decimal_range_is_rejected_without_side_effects() {
        let mut account = opened(AccountType::Standard, 0, 0);
        record_exact(&mut account, MovementKind::Deposit, Decimal::MAX, test_time()).unwrap();
        let before = account.clone();

        let err = record(&mut account, MovementKind::Deposit, 1).unwrap_err();
        assert_eq!(
            err,
            DomainError::validation("amount exceeds the representable balance")
        );
        assert_eq!(account, before);

        record(&mut account, MovementKind::Payment, 1).unwrap();
        assert_eq!(account.balance(), Decimal::MAX - Decimal::ONE);
    }

    #[test]
    fn payment_is_accepted_when_balance_plus_credit_exceeds_decimal_range() {
        let id = test_account_id();
        let mut cmd = open_cmd(id, AccountType::Credit, 0, 0);
        cmd.begin_balance = Decimal::MAX;
        cmd.credit_line = Decimal::MAX;
        let mut account = Account::empty(id);
        execute(&mut account, &AccountCommand::OpenAccount(cmd)).unwrap();

        assert_eq!(account.available_funds(), Decimal::MAX);
        record_exact(&mut account, MovementKind::Payment, Decimal::MAX, test_time()).unwrap();
        assert_eq!(account.balance(), Decimal::ZERO);
    }

    #[test]
    fn balance_snapshot_is_post_insertion_balance() {
        let mut account = opened(AccountType::Standard, 100, 0);
        let deposit = record(&mut account, MovementKind::Deposit, 50).unwrap();
        let payment = record(&mut account, MovementKind::Payment, 30).unwrap();

        assert_eq!(account.movement(deposit).unwrap().balance_snapshot(), dec(150));
        assert_eq!(account.movement(payment).unwrap().balance_snapshot(), dec(120));
    }

    #[test]
    fn recording_the_same_movement_id_twice_is_a_conflict() {
        let mut account = opened(AccountType::Standard, 100, 0);
        let movement_id = record(&mut account, MovementKind::Deposit, 5).unwrap();

        let err = account
            .handle(&AccountCommand::RecordMovement(RecordMovement {
                account_id: account.id_typed(),
                movement_id,
                kind: MovementKind::Deposit,
                amount: dec(5),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn only_the_most_recent_movement_can_be_removed() {
        let mut account = opened(AccountType::Standard, 0, 0);
        let t0 = test_time();
        let m1 = record_at(&mut account, MovementKind::Deposit, 10, t0).unwrap();
        let m2 = record_at(&mut account, MovementKind::Payment, 5, t0 + Duration::seconds(1)).unwrap();

        let err = remove(&mut account, m1).unwrap_err();
        assert!(matches!(err, DomainError::Integrity(_)));

        remove(&mut account, m2).unwrap();
        assert_eq!(account.balance(), dec(10));

        remove(&mut account, m1).unwrap();
        assert_eq!(account.balance(), Decimal::ZERO);
    }

    #[test]
    fn equal_timestamps_fall_back_to_ledger_sequence() {
        let mut account = opened(AccountType::Standard, 0, 0);
        let at = test_time();
        let first = record_at(&mut account, MovementKind::Deposit, 1, at).unwrap();
        let second = record_at(&mut account, MovementKind::Deposit, 2, at).unwrap();

        assert_eq!(account.latest_movement().map(Movement::id_typed), Some(second));
        assert!(matches!(remove(&mut account, first), Err(DomainError::Integrity(_))));
    }

    #[test]
    fn removing_an_unknown_movement_is_not_found() {
        let mut account = opened(AccountType::Standard, 0, 0);
        assert_eq!(remove(&mut account, MovementId::new()), Err(DomainError::NotFound));
    }

    #[test]
    fn sequences_are_not_reused_after_removal() {
        let mut account = opened(AccountType::Standard, 0, 0);
        let at = test_time();
        let first = record_at(&mut account, MovementKind::Deposit, 1, at).unwrap();
        remove(&mut account, first).unwrap();
        let second = record_at(&mut account, MovementKind::Deposit, 1, at).unwrap();
        assert_eq!(account.movement(second).unwrap().sequence(), 2);
    }

    #[test]
    fn undo_last_movement_removes_latest_or_does_nothing() {
        let mut account = opened(AccountType::Standard, 0, 0);
        let undo = AccountCommand::UndoLastMovement(UndoLastMovement {
            account_id: account.id_typed(),
            occurred_at: test_time(),
        });

        assert!(execute(&mut account, &undo).unwrap().is_empty());

        record(&mut account, MovementKind::Deposit, 3).unwrap();
        let events = execute(&mut account, &undo).unwrap();
        assert_eq!(events.len(), 1);
        assert!(account.movements().is_empty());
        assert_eq!(account.balance(), Decimal::ZERO);
    }

    #[test]
    fn begin_balance_and_type_are_immutable() {
        let account = opened(AccountType::Standard, 100, 0);

        let mut change_balance = update(&account);
        change_balance.begin_balance = Some(dec(100));
        let mut change_type = update(&account);
        change_type.account_type = Some(AccountType::Credit);

        for cmd in [change_balance, change_type] {
            let err = account.handle(&AccountCommand::UpdateAccount(cmd)).unwrap_err();
            assert!(matches!(err, DomainError::Immutability(_)), "got {err:?}");
        }
    }

    #[test]
    fn update_passes_name_credit_line_and_customers_through() {
        let mut account = opened(AccountType::Credit, 0, 0);
        let co_owner = CustomerId::new();
        let mut cmd = update(&account);
        cmd.name = Some(" Joint ".to_string());
        cmd.credit_line = Some(dec(300));
        cmd.customers = Some(vec![co_owner, co_owner]);

        execute(&mut account, &AccountCommand::UpdateAccount(cmd)).unwrap();

        assert_eq!(account.name(), "Joint");
        assert_eq!(account.credit_line(), dec(300));
        assert_eq!(account.customers().len(), 1);
        assert!(account.customers().contains(&co_owner));
    }

    #[test]
    fn update_runs_the_same_validation_as_open() {
        let account = opened(AccountType::Credit, 0, 0);

        let mut no_customers = update(&account);
        no_customers.customers = Some(vec![]);
        let mut negative_credit = update(&account);
        negative_credit.credit_line = Some(dec(-1));

        for cmd in [no_customers, negative_credit] {
            let err = account.handle(&AccountCommand::UpdateAccount(cmd)).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)), "got {err:?}");
        }
    }

    #[test]
    fn advisories_flag_protected_fields_and_standard_credit_lines() {
        let account = opened(AccountType::Standard, 0, 0);
        let mut cmd = update(&account);
        cmd.credit_line = Some(dec(10));
        cmd.account_type = Some(AccountType::Credit);

        let fields: Vec<&str> = account.advise(&cmd).iter().map(|a| a.field).collect();
        assert_eq!(fields, vec!["account_type", "credit_line"]);
    }

    #[test]
    fn account_with_movements_cannot_be_deleted() {
        let mut account = opened(AccountType::Standard, 0, 0);
        let delete = AccountCommand::DeleteAccount(DeleteAccount {
            account_id: account.id_typed(),
            occurred_at: test_time(),
        });

        let movement_id = record(&mut account, MovementKind::Deposit, 1).unwrap();
        assert!(matches!(account.handle(&delete), Err(DomainError::Integrity(_))));

        remove(&mut account, movement_id).unwrap();
        execute(&mut account, &delete).unwrap();
        assert!(account.is_deleted());

        let err = record(&mut account, MovementKind::Deposit, 1).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn commands_on_unopened_account_are_not_found() {
        let account = Account::empty(test_account_id());
        let cmd = update(&account);
        assert_eq!(
            account.handle(&AccountCommand::UpdateAccount(cmd)),
            Err(DomainError::NotFound)
        );
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let account = opened(AccountType::Standard, 100, 0);
        let before = account.clone();
        let cmd = AccountCommand::RecordMovement(RecordMovement {
            account_id: account.id_typed(),
            movement_id: MovementId::new(),
            kind: MovementKind::Payment,
            amount: dec(40),
            occurred_at: test_time(),
        });

        let first = account.handle(&cmd).unwrap();
        let second = account.handle(&cmd).unwrap();

        assert_eq!(account, before);
        assert_eq!(first, second);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Deposit(i64),
        Payment(i64),
        RemoveLatest,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (1i64..10_000).prop_map(Step::Deposit),
            (1i64..10_000).prop_map(Step::Payment),
            Just(Step::RemoveLatest),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of accepted and rejected steps the balance
        /// equals the opening balance plus the signed sum of the attached movements,
        /// and never drops below the negative applicable credit.
        #[test]
        fn balance_tracks_ledger(
            begin in 0i64..5_000,
            credit in 0i64..5_000,
            is_credit in any::<bool>(),
            steps in prop::collection::vec(step(), 1..40)
        ) {
            let account_type = if is_credit { AccountType::Credit } else { AccountType::Standard };
            let mut account = opened(account_type, begin, credit);

            for s in steps {
                let _ = match s {
                    Step::Deposit(amount) => record(&mut account, MovementKind::Deposit, amount).map(|_| ()),
                    Step::Payment(amount) => record(&mut account, MovementKind::Payment, amount).map(|_| ()),
                    Step::RemoveLatest => match account.latest_movement().map(Movement::id_typed) {
                        Some(id) => remove(&mut account, id).map(|_| ()),
                        None => Ok(()),
                    },
                };

                let expected = account
                    .movements()
                    .iter()
                    .fold(dec(begin), |acc, m| match m.kind() {
                        MovementKind::Deposit => acc + m.amount(),
                        MovementKind::Payment => acc - m.amount(),
                    });
                prop_assert_eq!(account.balance(), expected);
                prop_assert!(account.balance() >= -account.applicable_credit());
            }
        }
    }
}

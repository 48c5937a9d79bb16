//! Accounts module (bank accounts and their movement ledgers, event-sourced).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod account;
pub mod movement;

pub use account::{
    AGGREGATE_TYPE, Account, AccountCommand, AccountDeleted, AccountEvent, AccountId,
    AccountOpened, AccountType, AccountUpdated, DeleteAccount, MovementRecorded,
    MovementRemoved, OpenAccount, RecordMovement, RemoveMovement, UndoLastMovement,
    UpdateAccount, credit_available,
};
pub use movement::{Movement, MovementId, MovementKind};

//! Bank application service: inbound calls with value maps, outbound read-model queries.

pub mod app;

pub use app::Bank;
pub use app::dto::{AccountChanges, AccountValues, CustomerValues, MovementValues, from_json};
pub use app::errors::{BankError, ErrorKind};

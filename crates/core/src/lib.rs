//! `bankbook-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod advisory;
pub mod aggregate;
pub mod currency;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use advisory::Advisory;
pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use currency::Currency;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, CustomerId};
pub use value_object::ValueObject;

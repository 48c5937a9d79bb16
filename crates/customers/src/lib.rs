//! Customers domain module (account owners, event-sourced).
//!
//! This crate contains the business rules for customers: contact-field formats,
//! their advisory mirrors, and the customer lifecycle. Deterministic domain logic
//! only (no IO, no HTTP, no storage).

pub mod contact;
pub mod customer;

pub use contact::{ContactInfo, advise, validate_login};
pub use customer::{
    AGGREGATE_TYPE, Customer, CustomerCommand, CustomerEvent, CustomerRegistered,
    CustomerRemoved, CustomerUpdated, RegisterCustomer, RemoveCustomer, UpdateCustomer,
};

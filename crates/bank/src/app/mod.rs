//! Application wiring.
//!
//! - `services.rs`: the `Bank` facade (event store/bus, dispatcher, projections)
//! - `dto.rs`: value maps accepted by the service and their JSON mapping
//! - `errors.rs`: error classification for callers

pub mod dto;
pub mod errors;
pub mod services;

pub use services::Bank;

//! Strata Core: event-sourcing abstractions.
//!
//! This crate defines the aggregate state machine, the persisted event and
//! snapshot records, and the traits the store and bus implementations
//! satisfy. It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod repository;
pub mod snapshot;

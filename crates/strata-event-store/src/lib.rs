//! Strata event store.
//!
//! [`aggregate_store::AggregateStore`] implements the load and save protocol
//! over any [`strata_core::repository::EventRepository`];
//! [`pg_event_repository::PgEventRepository`] is the `PostgreSQL` backend.

pub mod aggregate_store;
pub mod config;
pub mod pg_event_repository;
pub mod schema;

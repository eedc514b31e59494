//! Strata Orders: sample bounded context.
//!
//! An order aggregate with its events and commands, command handlers running
//! against an [`strata_event_store::aggregate_store::AggregateStore`], and a
//! summary read model fed from the event log.

pub mod application;
pub mod domain;

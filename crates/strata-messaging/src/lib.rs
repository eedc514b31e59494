//! Strata Messaging: publication and consumption of committed events over a
//! partitioned log.
//!
//! The broker itself sits behind the [`broker`] traits; [`memory::MemoryLog`]
//! is the in-process implementation. On top of them this crate provides the
//! [`producer::Producer`] delivery profiles, the [`event_bus::LogEventBus`]
//! used by the aggregate store, and the [`consumer_group::ConsumerGroup`]
//! worker pools.

pub mod broker;
pub mod cancel;
pub mod config;
pub mod consumer_group;
pub mod error;
pub mod event_bus;
pub mod memory;
pub mod producer;
pub mod propagation;
pub mod telemetry;

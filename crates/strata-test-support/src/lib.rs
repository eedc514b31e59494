//! Shared test doubles for the Strata event-sourcing engine.

mod clock;
mod event_bus;
mod repository;

pub use clock::FixedClock;
pub use event_bus::RecordingEventBus;
pub use repository::{Fault, MemoryEventRepository, TransactionStats};

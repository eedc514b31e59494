//! Shared fixtures for the aggregate store tests.
#![allow(dead_code)]

use std::num::NonZeroU64;
use std::sync::{Arc, LazyLock};

use serde::{Deserialize, Serialize};
use strata_core::aggregate::{Aggregate, AggregateBase};
use strata_core::codec::EventRegistry;
use strata_core::error::DomainError;
use strata_core::event::{AggregateType, DomainEvent, Event};
use strata_event_store::aggregate_store::AggregateStore;
use strata_event_store::config::EventStoreConfig;
use strata_test_support::{FixedClock, MemoryEventRepository, RecordingEventBus};

pub const COUNTER: &str = "Counter";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incremented {
    pub by: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CounterEvent {
    Incremented(Incremented),
    /// Replays fine but refuses to serialize.
    Poisoned,
}

static REGISTRY: LazyLock<EventRegistry<CounterEvent>> =
    LazyLock::new(|| EventRegistry::new().register("Incremented", CounterEvent::Incremented));

impl DomainEvent for CounterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Incremented(_) => "Incremented",
            Self::Poisoned => "Poisoned",
        }
    }

    fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::Incremented(payload) => serde_json::to_vec(payload),
            Self::Poisoned => Err(<serde_json::Error as serde::ser::Error>::custom(
                "poisoned payload",
            )),
        }
    }

    fn registry() -> &'static EventRegistry<Self> {
        &REGISTRY
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Counter {
    #[serde(flatten)]
    base: AggregateBase<CounterEvent>,
    pub total: i64,
}

impl Counter {
    pub fn new(id: &str) -> Self {
        let mut base = AggregateBase::new(AggregateType::new(COUNTER));
        base.set_id(id);
        Self { base, total: 0 }
    }

    pub fn increment(&mut self, by: i64) {
        self.apply(inc(by)).unwrap();
    }
}

impl Aggregate for Counter {
    type Event = CounterEvent;

    fn base(&self) -> &AggregateBase<CounterEvent> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AggregateBase<CounterEvent> {
        &mut self.base
    }

    fn when(&mut self, event: &CounterEvent) -> Result<(), DomainError> {
        if let CounterEvent::Incremented(Incremented { by }) = event {
            self.total += by;
        }
        Ok(())
    }
}

pub fn inc(by: i64) -> CounterEvent {
    CounterEvent::Incremented(Incremented { by })
}

/// A persisted `Incremented` record for seeding the repository.
pub fn record(aggregate_id: &str, version: u64, by: i64) -> Event {
    Event::from_domain(
        aggregate_id,
        &AggregateType::new(COUNTER),
        version,
        &inc(by),
        FixedClock::default().0,
    )
    .unwrap()
}

pub struct Fixture {
    pub repository: MemoryEventRepository,
    pub bus: RecordingEventBus,
    pub store: AggregateStore,
}

pub fn fixture(snapshot_frequency: u64) -> Fixture {
    fixture_with_bus(snapshot_frequency, RecordingEventBus::new())
}

pub fn fixture_with_bus(snapshot_frequency: u64, bus: RecordingEventBus) -> Fixture {
    let repository = MemoryEventRepository::new();
    let config = EventStoreConfig::new(NonZeroU64::new(snapshot_frequency).unwrap());
    let store = AggregateStore::new(Arc::new(repository.clone()), Arc::new(bus.clone()), config)
        .with_clock(Arc::new(FixedClock::default()));
    Fixture {
        repository,
        bus,
        store,
    }
}

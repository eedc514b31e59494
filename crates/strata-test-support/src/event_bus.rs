//! Test event bus: records published batches.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use strata_core::error::DomainError;
use strata_core::event::Event;
use strata_core::event_bus::EventBus;

/// An event bus that records every batch it is asked to publish. Built with
/// [`RecordingEventBus::failing`] it records the attempt and then fails.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventBus {
    batches: Arc<Mutex<Vec<Vec<Event>>>>,
    fail: bool,
}

impl RecordingEventBus {
    /// Creates a bus that accepts every batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus that rejects every batch with `DomainError::Publish`.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Returns all batches received so far.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn process_events(&self, events: &[Event]) -> Result<(), DomainError> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner).push(events.to_vec());
        if self.fail {
            return Err(DomainError::Publish("broker unavailable".into()));
        }
        Ok(())
    }
}

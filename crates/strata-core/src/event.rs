//! Event model: the persisted event record and the domain event contract.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::EventRegistry;
use crate::error::DomainError;

/// Tag naming the kind of aggregate a stream belongs to (e.g. `"Order"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateType(String);

impl AggregateType {
    /// Creates a new aggregate type tag.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AggregateType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Key-value metadata attached to a persisted event.
pub type Metadata = BTreeMap<String, String>;

/// A committed domain event in its persisted, type-erased form.
///
/// Events of one aggregate form a gapless sequence ordered by `version`,
/// starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: String,
    /// Type of the aggregate this event belongs to.
    pub aggregate_type: AggregateType,
    /// Event type name used to pick a decoder at replay time.
    pub event_type: String,
    /// Serialized event payload.
    pub data: Vec<u8>,
    /// Free-form metadata (trace ids, user ids, ...).
    pub metadata: Metadata,
    /// The aggregate version this event produced.
    pub version: u64,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Serializes a domain event into a persisted record.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    pub fn from_domain<E: DomainEvent>(
        aggregate_id: &str,
        aggregate_type: &AggregateType,
        version: u64,
        event: &E,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let data = event.to_payload().map_err(|e| {
            DomainError::Serialization(format!(
                "encode {} for aggregate {aggregate_id}: {e}",
                event.event_type()
            ))
        })?;

        Ok(Self {
            event_id: Uuid::new_v4(),
            aggregate_id: aggregate_id.to_owned(),
            aggregate_type: aggregate_type.clone(),
            event_type: event.event_type().to_owned(),
            data,
            metadata: event.metadata(),
            version,
            timestamp,
        })
    }

    /// Returns true for a zero-value record: no type or no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.event_type.is_empty() || self.data.is_empty()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(Event) AggregateID: {}, Version: {}, EventType: {}, AggregateType: {}, Metadata: {:?}, TimeStamp: {}",
            self.aggregate_id,
            self.version,
            self.event_type,
            self.aggregate_type,
            self.metadata,
            self.timestamp,
        )
    }
}

/// Trait that all domain events implement.
///
/// A domain event is a tagged union keyed by [`DomainEvent::event_type`];
/// decoding back from the persisted form goes through the type's
/// [`EventRegistry`].
pub trait DomainEvent: Send + Sync + fmt::Debug + Sized + 'static {
    /// Returns the event type name (used for decoder routing).
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload.
    ///
    /// # Errors
    ///
    /// Returns the encoder error if the payload cannot be serialized.
    fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error>;

    /// Returns the decoder registry for this event type.
    fn registry() -> &'static EventRegistry<Self>;

    /// Metadata persisted alongside the event.
    fn metadata(&self) -> Metadata {
        Metadata::new()
    }
}

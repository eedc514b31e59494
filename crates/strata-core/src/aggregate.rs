//! Aggregate state machine.
//!
//! A concrete aggregate embeds an [`AggregateBase`] and implements
//! [`Aggregate`], supplying its replay function as [`Aggregate::when`]. The
//! provided methods keep `version` and the pending `changes` consistent:
//!
//! | Operation | Replays | `version` | Appends to `changes` |
//! |---|---|---|---|
//! | [`Aggregate::load`] | each event | +1 per event | no |
//! | [`Aggregate::apply`] | the event | +1 | yes |
//! | [`Aggregate::raise_event`] | the event | +1 | no |

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::event::{AggregateType, DomainEvent};

/// Version of an aggregate that has never applied an event.
pub const START_VERSION: u64 = 0;

const CHANGES_CAPACITY: usize = 10;

/// Identity, version and pending changes shared by every aggregate.
///
/// Serializes with the aggregate's snapshot; pending changes are never part
/// of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct AggregateBase<E> {
    id: String,
    #[serde(rename = "type")]
    aggregate_type: AggregateType,
    version: u64,
    #[serde(skip)]
    changes: Vec<E>,
}

impl<E> AggregateBase<E> {
    /// Creates an empty base at version 0 with no id.
    #[must_use]
    pub fn new(aggregate_type: AggregateType) -> Self {
        Self {
            id: String::new(),
            aggregate_type,
            version: START_VERSION,
            changes: Vec::with_capacity(CHANGES_CAPACITY),
        }
    }

    /// Returns the aggregate id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sets the aggregate id.
    pub fn set_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = id.into();
        self
    }

    /// Returns the aggregate type.
    #[must_use]
    pub fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    /// Sets the aggregate type.
    pub fn set_type(&mut self, aggregate_type: AggregateType) {
        self.aggregate_type = aggregate_type;
    }

    /// Returns the number of events applied since creation.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns events applied since changes were last cleared.
    #[must_use]
    pub fn changes(&self) -> &[E] {
        &self.changes
    }

    /// Drops all pending changes.
    pub fn clear_changes(&mut self) {
        self.changes = Vec::with_capacity(CHANGES_CAPACITY);
    }

    fn record(&mut self, event: Option<E>) {
        self.version += 1;
        if let Some(event) = event {
            self.changes.push(event);
        }
    }
}

impl<E> fmt::Display for AggregateBase<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(Aggregate) AggregateID: {}, Type: {}, Version: {}, Changes: {}",
            self.id,
            self.aggregate_type,
            self.version,
            self.changes.len()
        )
    }
}

/// Capability set every event-sourced aggregate satisfies.
///
/// The serialized form of the whole aggregate is its snapshot state, so
/// implementors derive `Serialize`/`Deserialize` including the embedded
/// [`AggregateBase`].
pub trait Aggregate: Serialize + DeserializeOwned + Send + Sync {
    /// The event enum this aggregate produces and replays.
    type Event: DomainEvent;

    /// Returns the embedded state machine.
    fn base(&self) -> &AggregateBase<Self::Event>;

    /// Returns the embedded state machine mutably.
    fn base_mut(&mut self) -> &mut AggregateBase<Self::Event>;

    /// Replay function: mutates domain state for one event.
    ///
    /// Must be deterministic and touch nothing but the aggregate's own fields.
    ///
    /// # Errors
    ///
    /// Returns a `DomainError` if the event cannot be applied to the current
    /// state.
    fn when(&mut self, event: &Self::Event) -> Result<(), DomainError>;

    /// Returns the aggregate id.
    fn id(&self) -> &str {
        self.base().id()
    }

    /// Sets the aggregate id.
    fn set_id(&mut self, id: impl Into<String>) {
        self.base_mut().set_id(id);
    }

    /// Returns the aggregate type.
    fn aggregate_type(&self) -> &AggregateType {
        self.base().aggregate_type()
    }

    /// Sets the aggregate type.
    fn set_type(&mut self, aggregate_type: AggregateType) {
        self.base_mut().set_type(aggregate_type);
    }

    /// Returns the current version.
    fn version(&self) -> u64 {
        self.base().version()
    }

    /// Returns the events not yet cleared by a save.
    fn changes(&self) -> &[Self::Event] {
        self.base().changes()
    }

    /// Drops pending changes.
    fn clear_changes(&mut self) {
        self.base_mut().clear_changes();
    }

    /// Replays historical events in order without marking them pending.
    ///
    /// Stops at the first failing event; events replayed before it stay applied.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by [`Aggregate::when`].
    fn load<I>(&mut self, events: I) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = Self::Event>,
    {
        for event in events {
            self.when(&event)?;
            self.base_mut().record(None);
        }
        Ok(())
    }

    /// Applies a newly produced event and marks it pending.
    ///
    /// # Errors
    ///
    /// Returns the error produced by [`Aggregate::when`]; version and changes
    /// are left untouched in that case.
    fn apply(&mut self, event: Self::Event) -> Result<(), DomainError> {
        self.when(&event)?;
        self.base_mut().record(Some(event));
        Ok(())
    }

    /// Replays one already-persisted event without marking it pending.
    ///
    /// # Errors
    ///
    /// Returns the error produced by [`Aggregate::when`].
    fn raise_event(&mut self, event: &Self::Event) -> Result<(), DomainError> {
        self.when(event)?;
        self.base_mut().record(None);
        Ok(())
    }

    /// Prepares the aggregate for snapshot capture.
    fn to_snapshot(&mut self) {
        self.clear_changes();
    }

    /// Diagnostic one-line description.
    fn describe(&self) -> String {
        self.base().to_string()
    }
}

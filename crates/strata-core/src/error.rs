//! Domain error types.

use thiserror::Error;

/// Top-level error type for aggregate, store and bus operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate with this id has already recorded events.
    #[error("aggregate already exists: {0}")]
    AlreadyExists(String),

    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(String),

    /// A zero-value or otherwise empty event was replayed.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The event type is not known to the aggregate's codec registry.
    #[error("invalid event type: {0}")]
    InvalidEventType(String),

    /// The command cannot be routed to this aggregate.
    #[error("invalid command type: {0}")]
    InvalidCommandType(String),

    /// The aggregate is in a state that cannot be persisted or restored.
    #[error("invalid aggregate: {0}")]
    InvalidAggregate(String),

    /// The aggregate id is empty or malformed.
    #[error("invalid aggregate id: {0:?}")]
    InvalidAggregateId(String),

    /// A loaded event does not continue the aggregate's version sequence.
    #[error("invalid event version for aggregate {aggregate_id}: expected {expected}, found {actual}")]
    InvalidEventVersion {
        /// The aggregate being hydrated.
        aggregate_id: String,
        /// The version the next event had to carry.
        expected: u64,
        /// The version it actually carried.
        actual: u64,
    },

    /// No snapshot has been captured for the aggregate yet.
    #[error("snapshot not found for aggregate {0}")]
    SnapshotNotFound(String),

    /// Optimistic concurrency conflict on `(aggregate_id, version)`.
    #[error("concurrency conflict on aggregate {aggregate_id} at version {version}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: String,
        /// The version that was already taken.
        version: u64,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// Payload or state could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing store failed (connection, transaction, query).
    #[error("storage error: {0}")]
    Storage(String),

    /// The event bus could not publish committed events.
    #[error("publish error: {0}")]
    Publish(String),

    /// Another error annotated with the operation that produced it.
    #[error("{operation}: {source}")]
    Operation {
        /// Which stage failed, including the aggregate it ran against.
        operation: String,
        /// The underlying failure.
        #[source]
        source: Box<DomainError>,
    },
}

impl DomainError {
    /// Wraps this error with the operation that produced it.
    #[must_use]
    pub fn context(self, operation: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping any `Operation` wrappers.
    #[must_use]
    pub fn root(&self) -> &DomainError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

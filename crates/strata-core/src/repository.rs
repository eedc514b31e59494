//! Backing-store abstraction.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::event::Event;
use crate::snapshot::Snapshot;

/// Read side of the backing store plus the entry point for write scopes.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Load events of one aggregate with `version > after_version`, ordered
    /// by version.
    async fn load_events(
        &self,
        aggregate_id: &str,
        after_version: u64,
    ) -> Result<Vec<Event>, DomainError>;

    /// Load the current snapshot of an aggregate.
    ///
    /// Returns `DomainError::SnapshotNotFound` when none has been captured.
    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Snapshot, DomainError>;

    /// Returns true if any event was ever recorded for the aggregate.
    async fn exists(&self, aggregate_id: &str) -> Result<bool, DomainError>;

    /// Opens a transactional write scope.
    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>, DomainError>;
}

/// A transactional write scope owned by a single save.
///
/// Dropping the scope without calling [`RepositoryTransaction::commit`]
/// rolls it back.
#[async_trait]
pub trait RepositoryTransaction: Send {
    /// Append events in order. A duplicate `(aggregate_id, version)` fails
    /// with `DomainError::ConcurrencyConflict`.
    async fn append_events(&mut self, events: &[Event]) -> Result<(), DomainError>;

    /// Insert or replace the aggregate's current snapshot.
    async fn upsert_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), DomainError>;

    /// Make all writes in this scope durable.
    async fn commit(self: Box<Self>) -> Result<(), DomainError>;

    /// Discard all writes in this scope.
    async fn rollback(self: Box<Self>) -> Result<(), DomainError>;
}

//! Aggregate persistence: snapshot-accelerated load and transactional save.

use std::sync::Arc;

use strata_core::aggregate::Aggregate;
use strata_core::clock::{Clock, SystemClock};
use strata_core::error::DomainError;
use strata_core::event::{AggregateType, DomainEvent, Event};
use strata_core::event_bus::EventBus;
use strata_core::repository::{EventRepository, RepositoryTransaction};
use strata_core::snapshot::Snapshot;
use tracing::{debug, instrument, warn};

use crate::config::EventStoreConfig;

/// Loads and saves aggregates against an [`EventRepository`] and announces
/// committed events on an [`EventBus`].
///
/// No per-aggregate locking happens here: two concurrent saves of the same
/// aggregate are told apart by the repository's `(aggregate_id, version)`
/// uniqueness, surfacing as `DomainError::ConcurrencyConflict`.
#[derive(Clone)]
pub struct AggregateStore {
    repository: Arc<dyn EventRepository>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: EventStoreConfig,
}

impl AggregateStore {
    /// Creates a store stamping events with the system clock.
    #[must_use]
    pub fn new(
        repository: Arc<dyn EventRepository>,
        bus: Arc<dyn EventBus>,
        config: EventStoreConfig,
    ) -> Self {
        Self {
            repository,
            bus,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replaces the clock used for event timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Hydrates `aggregate` (whose id must be set) from storage.
    ///
    /// With a snapshot, the aggregate is replaced by the snapshot state and
    /// the events after it are raised; otherwise the full history is loaded.
    /// An aggregate with no history is left as it was.
    ///
    /// # Errors
    ///
    /// Returns the first storage, decoding or replay failure, wrapped with
    /// the stage and aggregate it occurred in. The aggregate is not modified
    /// when the snapshot path fails.
    #[instrument(skip_all, fields(aggregate_id = %aggregate.id(), aggregate_type = %aggregate.aggregate_type()))]
    pub async fn load<A: Aggregate>(&self, aggregate: &mut A) -> Result<(), DomainError> {
        let aggregate_id = aggregate.id().to_owned();
        if aggregate_id.trim().is_empty() {
            return Err(DomainError::InvalidAggregateId(aggregate_id));
        }

        match self.repository.load_snapshot(&aggregate_id).await {
            Ok(snapshot) => {
                let restored = self
                    .load_from_snapshot::<A>(&aggregate_id, aggregate.aggregate_type(), &snapshot)
                    .await?;
                *aggregate = restored;
                debug!(aggregate = %aggregate.describe(), snapshot_version = snapshot.version, "loaded aggregate from snapshot");
            }
            Err(DomainError::SnapshotNotFound(_)) => {
                let records = self
                    .repository
                    .load_events(&aggregate_id, 0)
                    .await
                    .map_err(|e| e.context(format!("load events of {aggregate_id}")))?;
                let events = decode_sequence::<A>(&aggregate_id, aggregate.version(), &records)
                    .map_err(|e| e.context(format!("decode events of {aggregate_id}")))?;
                aggregate
                    .load(events)
                    .map_err(|e| e.context(format!("replay events of {aggregate_id}")))?;
                debug!(aggregate = %aggregate.describe(), "loaded aggregate from full history");
            }
            Err(e) => return Err(e.context(format!("load snapshot of {aggregate_id}"))),
        }

        Ok(())
    }

    async fn load_from_snapshot<A: Aggregate>(
        &self,
        aggregate_id: &str,
        aggregate_type: &AggregateType,
        snapshot: &Snapshot,
    ) -> Result<A, DomainError> {
        let mut restored: A = snapshot
            .restore()
            .map_err(|e| e.context(format!("restore snapshot of {aggregate_id}")))?;
        if restored.id() != aggregate_id {
            return Err(DomainError::InvalidAggregate(format!(
                "snapshot stored under {aggregate_id} belongs to {}",
                restored.id()
            ))
            .context(format!("restore snapshot of {aggregate_id}")));
        }
        if restored.aggregate_type() != aggregate_type {
            return Err(DomainError::InvalidAggregate(format!(
                "snapshot of {aggregate_id} holds a {} but a {aggregate_type} was requested",
                restored.aggregate_type()
            ))
            .context(format!("restore snapshot of {aggregate_id}")));
        }

        let records = self
            .repository
            .load_events(aggregate_id, snapshot.version)
            .await
            .map_err(|e| e.context(format!("load events of {aggregate_id} after v{}", snapshot.version)))?;
        let events = decode_sequence::<A>(aggregate_id, restored.version(), &records)
            .map_err(|e| e.context(format!("decode events of {aggregate_id} after v{}", snapshot.version)))?;
        for event in &events {
            restored
                .raise_event(event)
                .map_err(|e| e.context(format!("raise events of {aggregate_id}")))?;
        }
        Ok(restored)
    }

    /// Like [`AggregateStore::load`], but fails if nothing was ever recorded
    /// for the aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` for an aggregate with no
    /// history, or any error from [`AggregateStore::load`].
    pub async fn load_existing<A: Aggregate>(&self, aggregate: &mut A) -> Result<(), DomainError> {
        self.load(aggregate).await?;
        if aggregate.version() == 0 {
            return Err(DomainError::AggregateNotFound(aggregate.id().to_owned()));
        }
        Ok(())
    }

    /// Returns true if any event was ever recorded for `aggregate_id`.
    ///
    /// # Errors
    ///
    /// Returns the repository error with context.
    pub async fn exists(&self, aggregate_id: &str) -> Result<bool, DomainError> {
        self.repository
            .exists(aggregate_id)
            .await
            .map_err(|e| e.context(format!("check existence of {aggregate_id}")))
    }

    /// Persists the aggregate's pending changes.
    ///
    /// Opens a write scope, serializes and appends every pending change,
    /// upserts a snapshot if the aggregate's version is a multiple of the
    /// snapshot frequency, commits, clears the pending changes and finally
    /// publishes the committed events. Without pending changes this is a
    /// no-op that touches no storage.
    ///
    /// # Errors
    ///
    /// Any failure before the commit rolls the scope back and leaves the
    /// aggregate untouched. A `DomainError::Publish` returned after the
    /// commit means the events are durable and the pending changes were
    /// cleared, but consumers have not been notified.
    #[instrument(skip_all, fields(aggregate_id = %aggregate.id(), aggregate_type = %aggregate.aggregate_type(), version = aggregate.version()))]
    pub async fn save<A: Aggregate>(&self, aggregate: &mut A) -> Result<(), DomainError> {
        if aggregate.changes().is_empty() {
            debug!("no pending changes");
            return Ok(());
        }

        let aggregate_id = aggregate.id().to_owned();
        if aggregate_id.trim().is_empty() {
            return Err(DomainError::InvalidAggregateId(aggregate_id));
        }

        let snapshot_due = aggregate.version() % self.config.snapshot_frequency.get() == 0;

        let mut tx = self
            .repository
            .begin()
            .await
            .map_err(|e| e.context(format!("begin save of {aggregate_id}")))?;

        let events = match self.write_changes(tx.as_mut(), aggregate, snapshot_due).await {
            Ok(events) => events,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                return Err(err);
            }
        };

        tx.commit()
            .await
            .map_err(|e| e.context(format!("commit save of {aggregate_id}")))?;

        if snapshot_due {
            aggregate.to_snapshot();
        } else {
            aggregate.clear_changes();
        }
        debug!(aggregate = %aggregate.describe(), events = events.len(), snapshot = snapshot_due, "saved aggregate");

        self.bus
            .process_events(&events)
            .await
            .map_err(|e| e.context(format!("publish events of {aggregate_id}")))
    }

    async fn write_changes<A: Aggregate>(
        &self,
        tx: &mut dyn RepositoryTransaction,
        aggregate: &A,
        snapshot_due: bool,
    ) -> Result<Vec<Event>, DomainError> {
        let aggregate_id = aggregate.id();
        let events = self.serialize_changes(aggregate)?;

        tx.append_events(&events)
            .await
            .map_err(|e| e.context(format!("append events of {aggregate_id}")))?;

        if snapshot_due {
            let snapshot = Snapshot::from_aggregate(aggregate)?;
            tx.upsert_snapshot(&snapshot)
                .await
                .map_err(|e| e.context(format!("save snapshot of {aggregate_id}")))?;
            debug!(%snapshot, "captured snapshot");
        }

        Ok(events)
    }

    /// Stamps each pending change with the version it produced.
    fn serialize_changes<A: Aggregate>(&self, aggregate: &A) -> Result<Vec<Event>, DomainError> {
        let changes = aggregate.changes();
        let pending = u64::try_from(changes.len()).unwrap_or(u64::MAX);
        let mut version = aggregate.version().checked_sub(pending).ok_or_else(|| {
            DomainError::InvalidAggregate(format!(
                "{} has {pending} pending changes at version {}",
                aggregate.id(),
                aggregate.version()
            ))
        })?;

        let timestamp = self.clock.now();
        changes
            .iter()
            .map(|change| {
                version += 1;
                Event::from_domain(aggregate.id(), aggregate.aggregate_type(), version, change, timestamp)
            })
            .collect()
    }
}

/// Decodes records that must continue the version sequence after `current`.
fn decode_sequence<A: Aggregate>(
    aggregate_id: &str,
    current: u64,
    records: &[Event],
) -> Result<Vec<A::Event>, DomainError> {
    let registry = A::Event::registry();
    let mut expected = current;
    records
        .iter()
        .map(|record| {
            expected += 1;
            if record.version != expected {
                return Err(DomainError::InvalidEventVersion {
                    aggregate_id: aggregate_id.to_owned(),
                    expected,
                    actual: record.version,
                });
            }
            registry.decode(record)
        })
        .collect()
}

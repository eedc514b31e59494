//! `PostgreSQL` implementation of the `EventRepository` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use strata_core::error::DomainError;
use strata_core::event::{AggregateType, Event, Metadata};
use strata_core::repository::{EventRepository, RepositoryTransaction};
use strata_core::snapshot::Snapshot;

const LOAD_EVENTS: &str = r"
SELECT event_id, aggregate_id, aggregate_type, event_type, data, metadata, version, timestamp
FROM events
WHERE aggregate_id = $1 AND version > $2
ORDER BY version ASC";

const LOAD_SNAPSHOT: &str = r"
SELECT aggregate_id, aggregate_type, state, version
FROM snapshots
WHERE aggregate_id = $1";

const EXISTS: &str = "SELECT EXISTS (SELECT 1 FROM events WHERE aggregate_id = $1)";

const INSERT_EVENT: &str = r"
INSERT INTO events (event_id, aggregate_id, aggregate_type, event_type, data, metadata, version, timestamp)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

const UPSERT_SNAPSHOT: &str = r"
INSERT INTO snapshots (aggregate_id, aggregate_type, state, version)
VALUES ($1, $2, $3, $4)
ON CONFLICT (aggregate_id)
DO UPDATE SET aggregate_type = EXCLUDED.aggregate_type, state = EXCLUDED.state, version = EXCLUDED.version";

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: Uuid,
    aggregate_id: String,
    aggregate_type: String,
    event_type: String,
    data: Option<Vec<u8>>,
    metadata: Json<Metadata>,
    version: i64,
    timestamp: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: row.event_id,
            version: from_db_version(row.version)?,
            aggregate_id: row.aggregate_id,
            aggregate_type: AggregateType::new(row.aggregate_type),
            event_type: row.event_type,
            data: row.data.unwrap_or_default(),
            metadata: row.metadata.0,
            timestamp: row.timestamp,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    aggregate_id: String,
    aggregate_type: String,
    state: Vec<u8>,
    version: i64,
}

fn storage_error(err: &sqlx::Error) -> DomainError {
    DomainError::Storage(err.to_string())
}

fn to_db_version(version: u64) -> Result<i64, DomainError> {
    i64::try_from(version)
        .map_err(|_| DomainError::Storage(format!("version {version} exceeds BIGINT range")))
}

fn from_db_version(version: i64) -> Result<u64, DomainError> {
    u64::try_from(version)
        .map_err(|_| DomainError::Storage(format!("negative version {version} in store")))
}

/// PostgreSQL-backed event repository.
#[derive(Debug, Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    /// Creates a new `PgEventRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    #[instrument(skip(self))]
    async fn load_events(
        &self,
        aggregate_id: &str,
        after_version: u64,
    ) -> Result<Vec<Event>, DomainError> {
        let rows: Vec<EventRow> = sqlx::query_as(LOAD_EVENTS)
            .bind(aggregate_id)
            .bind(to_db_version(after_version)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage_error(&e))?;

        debug!(count = rows.len(), "loaded events");
        rows.into_iter().map(Event::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn load_snapshot(&self, aggregate_id: &str) -> Result<Snapshot, DomainError> {
        let row: Option<SnapshotRow> = sqlx::query_as(LOAD_SNAPSHOT)
            .bind(aggregate_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error(&e))?;

        let row = row.ok_or_else(|| DomainError::SnapshotNotFound(aggregate_id.to_owned()))?;
        Ok(Snapshot {
            aggregate_id: row.aggregate_id,
            aggregate_type: AggregateType::new(row.aggregate_type),
            state: row.state,
            version: from_db_version(row.version)?,
        })
    }

    async fn exists(&self, aggregate_id: &str) -> Result<bool, DomainError> {
        sqlx::query_scalar(EXISTS)
            .bind(aggregate_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| storage_error(&e))
    }

    async fn begin(&self) -> Result<Box<dyn RepositoryTransaction>, DomainError> {
        let tx = self.pool.begin().await.map_err(|e| storage_error(&e))?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// A `PostgreSQL` transaction. Rolled back by `sqlx` when dropped uncommitted.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RepositoryTransaction for PgTransaction {
    async fn append_events(&mut self, events: &[Event]) -> Result<(), DomainError> {
        for event in events {
            let result = sqlx::query(INSERT_EVENT)
                .bind(event.event_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_type.as_str())
                .bind(&event.event_type)
                .bind(&event.data)
                .bind(Json(&event.metadata))
                .bind(to_db_version(event.version)?)
                .bind(event.timestamp)
                .execute(&mut *self.tx)
                .await;

            match result {
                Ok(_) => {}
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    return Err(DomainError::ConcurrencyConflict {
                        aggregate_id: event.aggregate_id.clone(),
                        version: event.version,
                    });
                }
                Err(e) => return Err(storage_error(&e)),
            }
        }
        Ok(())
    }

    async fn upsert_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), DomainError> {
        sqlx::query(UPSERT_SNAPSHOT)
            .bind(&snapshot.aggregate_id)
            .bind(snapshot.aggregate_type.as_str())
            .bind(&snapshot.state)
            .bind(to_db_version(snapshot.version)?)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| storage_error(&e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DomainError> {
        let Self { tx } = *self;
        tx.commit().await.map_err(|e| storage_error(&e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        let Self { tx } = *self;
        tx.rollback().await.map_err(|e| storage_error(&e))
    }
}

//! Event store configuration.

use std::num::NonZeroU64;

use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use strata_core::config::{self, ConfigError};

/// Events between snapshots when `STRATA_SNAPSHOT_FREQUENCY` is unset.
pub const DEFAULT_SNAPSHOT_FREQUENCY: u64 = 100;

/// Options consumed by [`crate::aggregate_store::AggregateStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStoreConfig {
    /// A snapshot is captured whenever a save leaves the aggregate at a
    /// version divisible by this value.
    pub snapshot_frequency: NonZeroU64,
}

impl EventStoreConfig {
    /// Creates a config with the given snapshot frequency.
    #[must_use]
    pub fn new(snapshot_frequency: NonZeroU64) -> Self {
        Self { snapshot_frequency }
    }

    /// Reads `STRATA_SNAPSHOT_FREQUENCY`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for zero or non-numeric values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = NonZeroU64::new(DEFAULT_SNAPSHOT_FREQUENCY).unwrap_or(NonZeroU64::MIN);
        Ok(Self {
            snapshot_frequency: config::parse_or("STRATA_SNAPSHOT_FREQUENCY", default)?,
        })
    }
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            snapshot_frequency: NonZeroU64::new(DEFAULT_SNAPSHOT_FREQUENCY)
                .unwrap_or(NonZeroU64::MIN),
        }
    }
}

/// Connection settings for the `PostgreSQL` backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PgConfig {
    /// Connection string.
    pub database_url: String,
    /// Pool size.
    pub max_connections: u32,
}

impl PgConfig {
    /// Reads `DATABASE_URL` and `STRATA_DB_MAX_CONNECTIONS`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `DATABASE_URL` is unset or the pool size does
    /// not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: config::required("DATABASE_URL")?,
            max_connections: config::parse_or("STRATA_DB_MAX_CONNECTIONS", 10)?,
        })
    }

    /// Opens a connection pool.
    ///
    /// # Errors
    ///
    /// Returns the `sqlx` error if the database is unreachable.
    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
    }
}

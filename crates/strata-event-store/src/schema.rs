//! Event store database schema.

/// SQL to create the events and snapshots tables.
///
/// `UNIQUE (aggregate_id, version)` is what turns two concurrent saves of the
/// same aggregate into a `ConcurrencyConflict`.
pub const CREATE_EVENT_STORE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS events (
    event_id       UUID PRIMARY KEY,
    aggregate_id   VARCHAR(250) NOT NULL CHECK (aggregate_id <> ''),
    aggregate_type VARCHAR(250) NOT NULL CHECK (aggregate_type <> ''),
    event_type     VARCHAR(250) NOT NULL CHECK (event_type <> ''),
    data           BYTEA,
    metadata       JSONB NOT NULL DEFAULT '{}'::jsonb,
    version        BIGINT NOT NULL CHECK (version > 0),
    timestamp      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (aggregate_id, version)
);

CREATE INDEX IF NOT EXISTS idx_events_aggregate_id
    ON events (aggregate_id, version);

CREATE TABLE IF NOT EXISTS snapshots (
    aggregate_id   VARCHAR(250) PRIMARY KEY CHECK (aggregate_id <> ''),
    aggregate_type VARCHAR(250) NOT NULL CHECK (aggregate_type <> ''),
    state          BYTEA NOT NULL,
    version        BIGINT NOT NULL CHECK (version > 0)
);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_matches_migration() {
        let migration = include_str!("../../../migrations/20260101000000_create_event_store.sql");
        assert_eq!(CREATE_EVENT_STORE_TABLES.trim(), migration.trim());
    }
}

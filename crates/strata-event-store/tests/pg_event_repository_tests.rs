//! Integration tests for `PgEventRepository`.
//!
//! These need a running `PostgreSQL` reachable through `DATABASE_URL`; run
//! them with `cargo test -- --ignored`.

use std::collections::BTreeMap;

use sqlx::PgPool;
use strata_core::error::DomainError;
use strata_core::event::{AggregateType, Event};
use strata_core::repository::EventRepository;
use strata_core::snapshot::Snapshot;
use strata_event_store::pg_event_repository::PgEventRepository;
use strata_test_support::FixedClock;
use uuid::Uuid;

/// Helper to build an `Event` with sensible defaults.
fn make_event(aggregate_id: &str, version: u64) -> Event {
    Event {
        event_id: Uuid::new_v4(),
        aggregate_id: aggregate_id.to_owned(),
        aggregate_type: AggregateType::new("Order"),
        event_type: "ItemAdded".to_owned(),
        data: br#"{"sku":"A-1"}"#.to_vec(),
        metadata: BTreeMap::from([("source".to_owned(), "test".to_owned())]),
        version,
        timestamp: FixedClock::default().0,
    }
}

fn make_snapshot(aggregate_id: &str, version: u64) -> Snapshot {
    Snapshot {
        aggregate_id: aggregate_id.to_owned(),
        aggregate_type: AggregateType::new("Order"),
        state: format!(r#"{{"version":{version}}}"#).into_bytes(),
        version,
    }
}

async fn append_committed(repo: &PgEventRepository, events: &[Event]) {
    let mut tx = repo.begin().await.unwrap();
    tx.append_events(events).await.unwrap();
    tx.commit().await.unwrap();
}

// --- load_events ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn test_load_events_returns_empty_vec_for_unknown_aggregate(pool: PgPool) {
    let repo = PgEventRepository::new(pool);

    let events = repo.load_events("missing", 0).await.unwrap();

    assert!(events.is_empty());
    assert!(!repo.exists("missing").await.unwrap());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn test_append_and_load_single_event(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    let event = make_event("order-1", 1);

    append_committed(&repo, std::slice::from_ref(&event)).await;

    let loaded = repo.load_events("order-1", 0).await.unwrap();
    assert_eq!(loaded, vec![event]);
    assert!(repo.exists("order-1").await.unwrap());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn test_load_events_after_version_is_ordered(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    // Inserted out of order on purpose.
    let events = vec![
        make_event("order-1", 3),
        make_event("order-1", 1),
        make_event("order-1", 2),
    ];
    append_committed(&repo, &events).await;

    let all = repo.load_events("order-1", 0).await.unwrap();
    let tail = repo.load_events("order-1", 1).await.unwrap();

    let versions: Vec<u64> = all.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    let versions: Vec<u64> = tail.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![2, 3]);
}

// --- aggregate isolation ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn test_aggregate_isolation(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    append_committed(&repo, &[make_event("order-a", 1)]).await;
    append_committed(&repo, &[make_event("order-b", 1)]).await;

    let loaded_a = repo.load_events("order-a", 0).await.unwrap();
    let loaded_b = repo.load_events("order-b", 0).await.unwrap();

    assert_eq!(loaded_a.len(), 1);
    assert_eq!(loaded_b.len(), 1);
    assert_eq!(loaded_a[0].aggregate_id, "order-a");
    assert_eq!(loaded_b[0].aggregate_id, "order-b");
}

// --- transactions ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn test_rollback_discards_appended_events(pool: PgPool) {
    let repo = PgEventRepository::new(pool);

    let mut tx = repo.begin().await.unwrap();
    tx.append_events(&[make_event("order-1", 1)]).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(repo.load_events("order-1", 0).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn test_dropped_transaction_is_rolled_back(pool: PgPool) {
    let repo = PgEventRepository::new(pool);

    {
        let mut tx = repo.begin().await.unwrap();
        tx.append_events(&[make_event("order-1", 1)]).await.unwrap();
    }

    assert!(repo.load_events("order-1", 0).await.unwrap().is_empty());
}

// --- concurrency ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn test_concurrency_conflict_on_duplicate_version(pool: PgPool) {
    let repo = PgEventRepository::new(pool);
    append_committed(&repo, &[make_event("order-1", 1)]).await;

    let mut tx = repo.begin().await.unwrap();
    let result = tx.append_events(&[make_event("order-1", 1)]).await;

    match result {
        Err(DomainError::ConcurrencyConflict {
            aggregate_id,
            version,
        }) => {
            assert_eq!(aggregate_id, "order-1");
            assert_eq!(version, 1);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
}

// --- snapshots ---

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn test_load_snapshot_reports_missing_snapshot(pool: PgPool) {
    let repo = PgEventRepository::new(pool);

    let err = repo.load_snapshot("order-1").await.unwrap_err();

    assert!(matches!(err, DomainError::SnapshotNotFound(id) if id == "order-1"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn test_upsert_snapshot_replaces_previous_snapshot(pool: PgPool) {
    let repo = PgEventRepository::new(pool);

    for version in [10, 20] {
        let mut tx = repo.begin().await.unwrap();
        tx.upsert_snapshot(&make_snapshot("order-1", version))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    let snapshot = repo.load_snapshot("order-1").await.unwrap();
    assert_eq!(snapshot, make_snapshot("order-1", 20));
}

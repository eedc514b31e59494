//! End-to-end: command handlers save through the aggregate store, the store
//! publishes on the log, and a consumer pool folds the log into summaries.

use std::num::{NonZeroU64, NonZeroUsize};
use std::sync::Arc;
use std::time::Duration;

use strata_core::command::BaseCommand;
use strata_core::error::DomainError;
use strata_core::event::AggregateType;
use strata_event_store::aggregate_store::AggregateStore;
use strata_event_store::config::EventStoreConfig;
use strata_messaging::cancel::CancelScope;
use strata_messaging::config::{ConsumerGroupConfig, EventBusConfig, ProducerConfig};
use strata_messaging::consumer_group::{ConsumerGroup, FailurePolicy};
use strata_messaging::event_bus::LogEventBus;
use strata_messaging::memory::MemoryLog;
use strata_messaging::producer::Producer;
use strata_orders::application::command_handlers::{
    handle_add_item, handle_cancel_order, handle_create_order, handle_pay_order,
};
use strata_orders::application::projections::{OrderSummary, OrderSummaryProjection};
use strata_orders::domain::aggregates::{ORDER, OrderStatus};
use strata_orders::domain::commands::{AddItem, CancelOrder, CreateOrder, PayOrder};
use strata_test_support::{FixedClock, MemoryEventRepository};

const GROUP: &str = "order-summaries";
const LIMIT: Duration = Duration::from_secs(5);

struct Pipeline {
    log: MemoryLog,
    repository: MemoryEventRepository,
    store: AggregateStore,
}

async fn pipeline() -> Pipeline {
    let log = MemoryLog::new();
    let producer = Producer::durable(Arc::new(log.clone()), ProducerConfig::default());
    let bus = LogEventBus::new(Arc::new(producer), EventBusConfig::default());
    bus.provision_topics(&log, &[AggregateType::new(ORDER)])
        .await
        .unwrap();

    let repository = MemoryEventRepository::new();
    let store = AggregateStore::new(
        Arc::new(repository.clone()),
        Arc::new(bus),
        EventStoreConfig::new(NonZeroU64::new(2).unwrap()),
    )
    .with_clock(Arc::new(FixedClock::default()));

    Pipeline {
        log,
        repository,
        store,
    }
}

fn topics() -> Vec<String> {
    vec!["es_Order".to_owned()]
}

/// One worker keeps per-partition delivery sequential.
fn summaries_group(log: &MemoryLog) -> ConsumerGroup {
    ConsumerGroup::new(
        Arc::new(log.clone()),
        ConsumerGroupConfig::new(GROUP).with_pool_size(NonZeroUsize::MIN),
    )
}

async fn project(log: &MemoryLog) -> Arc<OrderSummaryProjection> {
    let projection = Arc::new(OrderSummaryProjection::new());
    tokio::time::timeout(
        LIMIT,
        summaries_group(log).consume_with_processor(
            &topics(),
            &CancelScope::new(),
            Arc::clone(&projection),
            FailurePolicy::CancelOnError,
        ),
    )
    .await
    .expect("consumer pool did not drain the closed log")
    .unwrap();
    projection
}

async fn place_paid_order(store: &AggregateStore, id: &str) {
    handle_create_order(
        &CreateOrder {
            base: BaseCommand::new(id),
            customer_id: "cust-1".into(),
        },
        store,
    )
    .await
    .unwrap();
    for (sku, quantity, unit_price_cents) in [("SKU-1", 2, 450), ("SKU-2", 1, 100)] {
        handle_add_item(
            &AddItem {
                base: BaseCommand::new(id),
                sku: sku.into(),
                quantity,
                unit_price_cents,
            },
            store,
        )
        .await
        .unwrap();
    }
    handle_pay_order(
        &PayOrder {
            base: BaseCommand::new(id),
            amount_cents: 1000,
            payment_reference: "pay-1".into(),
        },
        store,
    )
    .await
    .unwrap();
}

async fn place_cancelled_order(store: &AggregateStore, id: &str) {
    handle_create_order(
        &CreateOrder {
            base: BaseCommand::new(id),
            customer_id: "cust-2".into(),
        },
        store,
    )
    .await
    .unwrap();
    handle_cancel_order(
        &CancelOrder {
            base: BaseCommand::new(id),
            reason: "duplicate".into(),
        },
        store,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_committed_orders_reach_the_summary_projection() {
    // Arrange
    let p = pipeline().await;
    place_paid_order(&p.store, "order-1").await;
    place_cancelled_order(&p.store, "order-2").await;
    p.log.close();

    // Act
    let projection = project(&p.log).await;

    // Assert
    assert_eq!(p.log.messages("es_Order").len(), 6);
    assert_eq!(
        projection.summaries(),
        vec![
            OrderSummary {
                order_id: "order-1".into(),
                customer_id: "cust-1".into(),
                status: OrderStatus::Paid,
                line_count: 2,
                total_cents: 1000,
                version: 4,
            },
            OrderSummary {
                order_id: "order-2".into(),
                customer_id: "cust-2".into(),
                status: OrderStatus::Cancelled,
                line_count: 0,
                total_cents: 0,
                version: 2,
            },
        ]
    );
}

#[tokio::test]
async fn test_snapshots_follow_configured_frequency() {
    let p = pipeline().await;

    place_paid_order(&p.store, "order-1").await;

    let snapshot = p.repository.snapshot("order-1").unwrap();
    assert_eq!(snapshot.version, 4);
    assert_eq!(p.repository.events("order-1").len(), 4);
}

#[tokio::test]
async fn test_group_resumes_after_committed_offsets() {
    let p = pipeline().await;
    place_cancelled_order(&p.store, "order-2").await;
    p.log.close();
    project(&p.log).await;

    let second_run = project(&p.log).await;

    assert!(second_run.summaries().is_empty());
}

#[tokio::test]
async fn test_publish_failure_after_commit_keeps_events_durable() {
    let p = pipeline().await;
    p.log.close();

    let err = handle_create_order(
        &CreateOrder {
            base: BaseCommand::new("order-3"),
            customer_id: "cust-3".into(),
        },
        &p.store,
    )
    .await
    .unwrap_err();

    assert!(matches!(err.root(), DomainError::Publish(_)));
    assert_eq!(p.repository.events("order-3").len(), 1);
}

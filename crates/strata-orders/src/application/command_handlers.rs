//! Command handlers for the Orders context.
//!
//! Each handler validates the command, loads the order through the
//! [`AggregateStore`], runs the domain operation and saves the resulting
//! events. Saving also publishes them on the store's event bus.

use strata_core::aggregate::Aggregate;
use strata_core::command::BaseCommand;
use strata_core::error::DomainError;
use strata_event_store::aggregate_store::AggregateStore;
use tracing::{info, instrument};

use crate::domain::aggregates::Order;
use crate::domain::commands::{AddItem, CancelOrder, CreateOrder, OrderCommand, PayOrder};

/// Result of a successfully handled command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCommandResult {
    /// The order affected by the command.
    pub aggregate_id: String,
    /// The order's version after the save.
    pub version: u64,
}

impl OrderCommandResult {
    fn of(order: &Order) -> Self {
        Self {
            aggregate_id: order.id().to_owned(),
            version: order.version(),
        }
    }
}

/// Handles `CreateOrder`: rejects ids that already have history, then opens
/// the order.
///
/// # Errors
///
/// Returns `DomainError::InvalidAggregateId` for a blank id,
/// `DomainError::AlreadyExists` if the order exists, `DomainError::Validation`
/// for a blank customer, or any store error.
#[instrument(skip_all, fields(aggregate_id = %command.base.aggregate_id))]
pub async fn handle_create_order(
    command: &CreateOrder,
    store: &AggregateStore,
) -> Result<OrderCommandResult, DomainError> {
    command.base.validate()?;
    let aggregate_id = command.base.aggregate_id.as_str();
    if store.exists(aggregate_id).await? {
        return Err(DomainError::AlreadyExists(aggregate_id.to_owned()));
    }

    let mut order = Order::new(aggregate_id);
    order.create(&command.customer_id)?;
    store.save(&mut order).await?;

    info!(customer_id = %command.customer_id, "order created");
    Ok(OrderCommandResult::of(&order))
}

/// Handles `AddItem`.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown order,
/// `DomainError::Validation` if the order rejects the item, or any store
/// error.
#[instrument(skip_all, fields(aggregate_id = %command.base.aggregate_id))]
pub async fn handle_add_item(
    command: &AddItem,
    store: &AggregateStore,
) -> Result<OrderCommandResult, DomainError> {
    update_order(store, &command.base, |order| {
        order.add_item(&command.sku, command.quantity, command.unit_price_cents)
    })
    .await
}

/// Handles `PayOrder`.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown order,
/// `DomainError::Validation` if the payment does not settle the order, or
/// any store error.
#[instrument(skip_all, fields(aggregate_id = %command.base.aggregate_id))]
pub async fn handle_pay_order(
    command: &PayOrder,
    store: &AggregateStore,
) -> Result<OrderCommandResult, DomainError> {
    let result = update_order(store, &command.base, |order| {
        order.pay(command.amount_cents, &command.payment_reference)
    })
    .await?;
    info!(amount_cents = command.amount_cents, "order paid");
    Ok(result)
}

/// Handles `CancelOrder`.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown order,
/// `DomainError::Validation` if the order can no longer be cancelled, or
/// any store error.
#[instrument(skip_all, fields(aggregate_id = %command.base.aggregate_id))]
pub async fn handle_cancel_order(
    command: &CancelOrder,
    store: &AggregateStore,
) -> Result<OrderCommandResult, DomainError> {
    let result = update_order(store, &command.base, |order| order.cancel(&command.reason)).await?;
    info!(reason = %command.reason, "order cancelled");
    Ok(result)
}

/// Routes any [`OrderCommand`] to its handler.
///
/// # Errors
///
/// Returns the error of the selected handler.
pub async fn handle_command(
    command: &OrderCommand,
    store: &AggregateStore,
) -> Result<OrderCommandResult, DomainError> {
    match command {
        OrderCommand::Create(c) => handle_create_order(c, store).await,
        OrderCommand::AddItem(c) => handle_add_item(c, store).await,
        OrderCommand::Pay(c) => handle_pay_order(c, store).await,
        OrderCommand::Cancel(c) => handle_cancel_order(c, store).await,
    }
}

async fn update_order<F>(
    store: &AggregateStore,
    base: &BaseCommand,
    action: F,
) -> Result<OrderCommandResult, DomainError>
where
    F: FnOnce(&mut Order) -> Result<(), DomainError>,
{
    base.validate()?;
    let mut order = Order::new(base.aggregate_id.as_str());
    store.load_existing(&mut order).await?;
    action(&mut order)?;
    store.save(&mut order).await?;
    Ok(OrderCommandResult::of(&order))
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;
    use std::sync::Arc;

    use strata_core::event::Event;
    use strata_event_store::config::EventStoreConfig;
    use strata_test_support::{FixedClock, MemoryEventRepository, RecordingEventBus};

    use super::*;
    use crate::domain::aggregates::OrderStatus;

    struct Harness {
        repository: MemoryEventRepository,
        bus: RecordingEventBus,
        store: AggregateStore,
    }

    fn harness() -> Harness {
        let repository = MemoryEventRepository::new();
        let bus = RecordingEventBus::new();
        let config = EventStoreConfig::new(NonZeroU64::new(100).unwrap());
        let store = AggregateStore::new(Arc::new(repository.clone()), Arc::new(bus.clone()), config)
            .with_clock(Arc::new(FixedClock::default()));
        Harness {
            repository,
            bus,
            store,
        }
    }

    fn create(id: &str) -> CreateOrder {
        CreateOrder {
            base: BaseCommand::new(id),
            customer_id: "cust-1".into(),
        }
    }

    fn add(id: &str, quantity: u32, unit_price_cents: u64) -> AddItem {
        AddItem {
            base: BaseCommand::new(id),
            sku: "SKU-1".into(),
            quantity,
            unit_price_cents,
        }
    }

    fn event_types(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.event_type.as_str()).collect()
    }

    #[tokio::test]
    async fn test_create_order_persists_and_publishes_created_event() {
        // Arrange
        let h = harness();

        // Act
        let result = handle_create_order(&create("order-1"), &h.store).await.unwrap();

        // Assert
        assert_eq!(
            result,
            OrderCommandResult {
                aggregate_id: "order-1".into(),
                version: 1,
            }
        );
        let stored = h.repository.events("order-1");
        assert_eq!(event_types(&stored), vec!["OrderCreated"]);
        assert_eq!(stored[0].aggregate_type.as_str(), "Order");
        assert_eq!(h.bus.batches(), vec![stored]);
    }

    #[tokio::test]
    async fn test_create_order_twice_returns_already_exists() {
        let h = harness();
        handle_create_order(&create("order-1"), &h.store).await.unwrap();

        let err = handle_create_order(&create("order-1"), &h.store)
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::AlreadyExists(id) if id == "order-1"));
        assert_eq!(h.repository.events("order-1").len(), 1);
    }

    #[tokio::test]
    async fn test_create_order_rejects_blank_id_before_touching_storage() {
        let h = harness();

        let err = handle_create_order(&create(" "), &h.store).await.unwrap_err();

        assert!(matches!(err, DomainError::InvalidAggregateId(_)));
        assert_eq!(h.repository.reads(), 0);
    }

    #[tokio::test]
    async fn test_add_item_to_unknown_order_returns_not_found() {
        let h = harness();

        let err = handle_add_item(&add("order-404", 1, 100), &h.store)
            .await
            .unwrap_err();

        assert!(matches!(err, DomainError::AggregateNotFound(id) if id == "order-404"));
        assert!(h.bus.batches().is_empty());
    }

    #[tokio::test]
    async fn test_full_lifecycle_appends_consecutive_versions() {
        // Arrange
        let h = harness();
        handle_create_order(&create("order-1"), &h.store).await.unwrap();
        handle_add_item(&add("order-1", 2, 450), &h.store).await.unwrap();

        // Act
        let result = handle_pay_order(
            &PayOrder {
                base: BaseCommand::new("order-1"),
                amount_cents: 900,
                payment_reference: "pay-1".into(),
            },
            &h.store,
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(result.version, 3);
        let stored = h.repository.events("order-1");
        assert_eq!(event_types(&stored), vec!["OrderCreated", "ItemAdded", "OrderPaid"]);
        let versions: Vec<u64> = stored.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(h.bus.batches().len(), 3);

        let mut reloaded = Order::new("order-1");
        h.store.load_existing(&mut reloaded).await.unwrap();
        assert_eq!(reloaded.status(), OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_rejected_command_saves_nothing() {
        let h = harness();
        handle_create_order(&create("order-1"), &h.store).await.unwrap();

        let err = handle_pay_order(
            &PayOrder {
                base: BaseCommand::new("order-1"),
                amount_cents: 100,
                payment_reference: "pay-1".into(),
            },
            &h.store,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(h.repository.events("order-1").len(), 1);
        assert_eq!(h.repository.stats().begun, 1);
    }

    #[tokio::test]
    async fn test_handle_command_dispatches_decoded_command() {
        let h = harness();
        handle_create_order(&create("order-1"), &h.store).await.unwrap();
        let command = OrderCommand::decode(
            "CancelOrder",
            br#"{"aggregateID":"order-1","reason":"duplicate"}"#,
        )
        .unwrap();

        let result = handle_command(&command, &h.store).await.unwrap();

        assert_eq!(result.version, 2);
        let mut reloaded = Order::new("order-1");
        h.store.load_existing(&mut reloaded).await.unwrap();
        assert_eq!(reloaded.status(), OrderStatus::Cancelled);
    }
}
